/// Set bit `bit` of `x` on if `toggle` is true, otherwise off.
pub fn bit(bit: u64, x: u64, toggle: bool) -> u64 {
    if toggle {
        x | (1 << bit)
    } else {
        x & !(1 << bit)
    }
}

/// Test whether bit `bit` of `x` is set.
pub fn test_bit(bit: u64, x: u64) -> bool {
    (x >> bit) & 1 == 1
}

/// Round `len` up to the next multiple of 8, the alignment of OpenFlow structures.
pub fn pad8(len: usize) -> usize {
    len.div_ceil(8) * 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_test() {
        let x = bit(4, 0, true);
        assert!(test_bit(4, x));
        assert!(!test_bit(3, x));
        assert_eq!(bit(4, x, false), 0);
    }

    #[test]
    fn pads_to_eight() {
        assert_eq!(pad8(0), 0);
        assert_eq!(pad8(4), 8);
        assert_eq!(pad8(8), 8);
        assert_eq!(pad8(22), 24);
    }
}
