//! Reads and writes fixed-width integers and doubles in a chosen byte order.
//!
//! Shapefiles mix byte orders field by field: header lengths and record
//! numbers are big-endian, shape types and coordinates little-endian. Callers
//! pass the byte order of each field along with the byte order of the
//! machine; bytes are swapped iff the two differ.

use byteorder::{ByteOrder, NativeEndian};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// The byte order of the machine we are running on.
    pub fn native() -> Endian {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

pub fn import16(buf: &[u8], target: Endian, arch: Endian) -> i16 {
    let v = NativeEndian::read_i16(buf);
    if target == arch { v } else { v.swap_bytes() }
}

pub fn import32(buf: &[u8], target: Endian, arch: Endian) -> i32 {
    let v = NativeEndian::read_i32(buf);
    if target == arch { v } else { v.swap_bytes() }
}

pub fn import64(buf: &[u8], target: Endian, arch: Endian) -> f64 {
    let v = NativeEndian::read_u64(buf);
    f64::from_bits(if target == arch { v } else { v.swap_bytes() })
}

pub fn export16(buf: &mut [u8], value: i16, target: Endian, arch: Endian) {
    let v = if target == arch { value } else { value.swap_bytes() };
    NativeEndian::write_i16(buf, v);
}

pub fn export32(buf: &mut [u8], value: i32, target: Endian, arch: Endian) {
    let v = if target == arch { value } else { value.swap_bytes() };
    NativeEndian::write_i32(buf, v);
}

pub fn export64(buf: &mut [u8], value: f64, target: Endian, arch: Endian) {
    let bits = value.to_bits();
    NativeEndian::write_u64(buf, if target == arch { bits } else { bits.swap_bytes() });
}

#[cfg(test)]
mod test {
    use super::*;
    use byteorder::{BigEndian, LittleEndian};

    #[test]
    fn test_import32_big_endian() {
        let arch = Endian::native();
        let mut buf = [ 0u8; 4 ];
        BigEndian::write_i32(&mut buf, 9994);
        assert_eq!(9994, import32(&buf, Endian::Big, arch));
    }

    #[test]
    fn test_import32_little_endian() {
        let arch = Endian::native();
        let mut buf = [ 0u8; 4 ];
        LittleEndian::write_i32(&mut buf, 1000);
        assert_eq!(1000, import32(&buf, Endian::Little, arch));
    }

    #[test]
    fn test_export_matches_byteorder() {
        let arch = Endian::native();
        let mut buf = [ 0u8; 8 ];
        export64(&mut buf, -123.456, Endian::Little, arch);
        assert_eq!(-123.456, LittleEndian::read_f64(&buf));

        export64(&mut buf, 7.25, Endian::Big, arch);
        assert_eq!(7.25, BigEndian::read_f64(&buf));

        export16(&mut buf, 0x0102, Endian::Big, arch);
        assert_eq!([ 1u8, 2u8 ], buf[0..2]);
    }

    #[test]
    fn test_swap_when_arch_differs() {
        // Pretending to be the other architecture flips what "native" means.
        let native = Endian::native();
        let foreign = if native == Endian::Big { Endian::Little } else { Endian::Big };
        let mut buf = [ 0u8; 4 ];
        export32(&mut buf, 42, foreign, native);
        assert_eq!(42, import32(&buf, native, foreign));
        assert_eq!(42, import16(&[ 0, 42 ], Endian::Big, native));
    }
}
