use fixed::types::{I32F32, I64F64};

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits. All rates,
/// stocks and efficiencies are carried in this type.
pub type Fixed64 = I32F32;

/// Milliseconds. The engine's unit for timestamps, durations and TTLs.
pub type Millis = u64;

/// Convert an f64 to Fixed64. Use only at the config/API boundary.
/// Out-of-range values saturate; NaN maps to zero.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    if v.is_nan() {
        return Fixed64::ZERO;
    }
    Fixed64::saturating_from_num(v)
}

/// Convert Fixed64 to f64. Use only for display.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Clamp a value into `[0, max]`. A negative `max` clamps to zero.
#[inline]
pub fn clamp_stock(v: Fixed64, max: Fixed64) -> Fixed64 {
    let max = max.max(Fixed64::ZERO);
    v.max(Fixed64::ZERO).min(max)
}

/// `value * num / den` at double width, so exact ratios stay exact.
/// Returns zero when `den` is not positive; saturates on overflow.
#[inline]
pub fn mul_div(value: Fixed64, num: Fixed64, den: Fixed64) -> Fixed64 {
    if den <= Fixed64::ZERO {
        return Fixed64::ZERO;
    }
    let product = I64F64::from_num(value).saturating_mul(I64F64::from_num(num));
    match product.checked_div(I64F64::from_num(den)) {
        Some(q) => Fixed64::saturating_from_num(q),
        None => Fixed64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed64_basic_arithmetic() {
        let a = f64_to_fixed64(1.5);
        let b = f64_to_fixed64(2.0);
        assert_eq!(fixed64_to_f64(a + b), 3.5);
    }

    #[test]
    fn clamp_stock_bounds() {
        let max = f64_to_fixed64(100.0);
        assert_eq!(clamp_stock(f64_to_fixed64(-5.0), max), Fixed64::ZERO);
        assert_eq!(clamp_stock(f64_to_fixed64(150.0), max), max);
        assert_eq!(clamp_stock(f64_to_fixed64(42.0), max), f64_to_fixed64(42.0));
    }

    #[test]
    fn clamp_stock_negative_max_is_zero() {
        assert_eq!(
            clamp_stock(f64_to_fixed64(10.0), f64_to_fixed64(-1.0)),
            Fixed64::ZERO
        );
    }

    #[test]
    fn saturating_conversion_of_huge_values() {
        assert_eq!(f64_to_fixed64(1e30), Fixed64::MAX);
    }

    #[test]
    fn mul_div_is_exact_for_whole_ratios() {
        let v = f64_to_fixed64(15.0);
        let r = mul_div(v, f64_to_fixed64(10.0), f64_to_fixed64(15.0));
        assert_eq!(r, f64_to_fixed64(10.0));
        assert_eq!(mul_div(v, v, Fixed64::ZERO), Fixed64::ZERO);
    }
}
