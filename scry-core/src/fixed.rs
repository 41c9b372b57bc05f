//! Unsigned fixed-point values in `[0, 1]`.
//!
//! Control messages store the fixed-point bits, not floats, so a value
//! survives serialization unchanged. Conversions from `f32` clamp and
//! round to the nearest representable step.

/// 32-bit fixed point; `u32::MAX` is 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UFixed32(u32);

impl UFixed32 {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(u32::MAX);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn to_bits(self) -> u32 {
        self.0
    }

    pub fn from_f32(value: f32) -> Self {
        let v = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        Self((v as f64 * u32::MAX as f64).round() as u32)
    }

    pub fn to_f32(self) -> f32 {
        (self.0 as f64 / u32::MAX as f64) as f32
    }
}

/// 16-bit fixed point; `u16::MAX` is 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UFixed16(u16);

impl UFixed16 {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(u16::MAX);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn to_bits(self) -> u16 {
        self.0
    }

    pub fn from_f32(value: f32) -> Self {
        let v = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        Self((v * u16::MAX as f32).round() as u16)
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / u16::MAX as f32
    }
}

/// A point on the device screen in normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: UFixed32,
    pub y: UFixed32,
}

impl Position {
    pub fn new(x: UFixed32, y: UFixed32) -> Self {
        Self { x, y }
    }

    /// Build from floats in `[0, 1]`; out-of-range values are clamped.
    pub fn normalized(x: f32, y: f32) -> Self {
        Self {
            x: UFixed32::from_f32(x),
            y: UFixed32::from_f32(y),
        }
    }

    /// Normalize a pixel coordinate inside a `width` x `height` area.
    ///
    /// Returns `None` when the point lies outside the area.
    pub fn from_pixels(px: i32, py: i32, width: u32, height: u32) -> Option<Self> {
        if px < 0 || py < 0 || width == 0 || height == 0 {
            return None;
        }
        let (px, py) = (px as u32, py as u32);
        if px >= width || py >= height {
            return None;
        }
        let nx = if width > 1 { px as f32 / (width - 1) as f32 } else { 0.0 };
        let ny = if height > 1 { py as f32 / (height - 1) as f32 } else { 0.0 };
        Some(Self::normalized(nx, ny))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_map_exactly() {
        assert_eq!(UFixed32::from_f32(0.0), UFixed32::ZERO);
        assert_eq!(UFixed32::from_f32(1.0), UFixed32::ONE);
        assert_eq!(UFixed16::from_f32(1.0), UFixed16::ONE);
        assert_eq!(UFixed32::ONE.to_f32(), 1.0);
        assert_eq!(UFixed16::ZERO.to_f32(), 0.0);
    }

    #[test]
    fn out_of_range_clamps() {
        assert_eq!(UFixed32::from_f32(-3.0), UFixed32::ZERO);
        assert_eq!(UFixed32::from_f32(7.5), UFixed32::ONE);
        assert_eq!(UFixed16::from_f32(f32::NAN), UFixed16::ZERO);
    }

    #[test]
    fn half_is_close() {
        let half = UFixed32::from_f32(0.5);
        assert!((half.to_f32() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn pixel_positions() {
        let p = Position::from_pixels(0, 0, 1080, 2340).unwrap();
        assert_eq!(p, Position::new(UFixed32::ZERO, UFixed32::ZERO));
        let p = Position::from_pixels(1079, 2339, 1080, 2340).unwrap();
        assert_eq!(p, Position::new(UFixed32::ONE, UFixed32::ONE));
        assert!(Position::from_pixels(1080, 10, 1080, 2340).is_none());
        assert!(Position::from_pixels(-1, 10, 1080, 2340).is_none());
    }
}
