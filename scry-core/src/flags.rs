use bitflags::bitflags;

bitflags! {
    /// Flag byte leading every video packet header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u8 {
        /// Codec parameter sets; must reach the decoder before dependent packets.
        const CONFIG = 0b0000_0001;
        /// Independently decodable picture.
        const KEY_FRAME = 0b0000_0010;
    }
}

bitflags! {
    /// Key modifier state, using the device's meta-state bit layout.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MetaState: u32 {
        const SHIFT_ON = 0x1;
        const ALT_ON = 0x2;
        const SYM_ON = 0x4;
        const FUNCTION_ON = 0x8;
        const ALT_LEFT_ON = 0x10;
        const ALT_RIGHT_ON = 0x20;
        const SHIFT_LEFT_ON = 0x40;
        const SHIFT_RIGHT_ON = 0x80;
        const CTRL_ON = 0x1000;
        const CTRL_LEFT_ON = 0x2000;
        const CTRL_RIGHT_ON = 0x4000;
        const META_ON = 0x10000;
        const META_LEFT_ON = 0x20000;
        const META_RIGHT_ON = 0x40000;
        const CAPS_LOCK_ON = 0x100000;
        const NUM_LOCK_ON = 0x200000;
        const SCROLL_LOCK_ON = 0x400000;
    }
}

impl MetaState {
    /// Modifiers that turn a printable key into a shortcut.
    pub fn has_command_modifier(self) -> bool {
        self.intersects(MetaState::CTRL_ON | MetaState::ALT_ON | MetaState::META_ON)
    }
}
