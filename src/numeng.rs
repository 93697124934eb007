//! Engineering-notation numbers.
//!
//! Values may carry one SI suffix character:
//!
//! ```text
//! a  f   p   n  u  m  K  M  G  T   P   E
//! -18 -15 -12 -9 -6 -3 +3 +6 +9 +12 +15 +18
//! ```
//!
//! `k` is accepted for kilo and `Meg`/`MEG`/`meg` for mega (SPICE spelling).
//! Suffixes are case-sensitive otherwise: `m` is milli, `M` is mega.

use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case};
use nom::character::complete::{digit0, digit1, one_of, satisfy};
use nom::combinator::{map, not, opt, peek, recognize};
use nom::IResult;
use nom::Parser;

const SUFFIXES: &str = "afpnum.KMGTPE";

/// Exponent (power of ten) for an engineering suffix character.
fn suffix_exponent(c: char) -> Option<i32> {
    let c = if c == 'k' { 'K' } else { c };
    SUFFIXES
        .find(c)
        .filter(|_| c != '.')
        .map(|p| (p as i32 - 6) * 3)
}

/// Convert an engineering-notation string to a number.
///
/// Returns `NaN` for anything that cannot be parsed.
pub fn eng2num(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() {
        return f64::NAN;
    }
    let text = text.replace("Meg", "M").replace("MEG", "M").replace("meg", "M");

    let Some(last) = text.chars().last() else {
        return f64::NAN;
    };
    if last.is_ascii_digit() {
        return text.parse::<f64>().unwrap_or(f64::NAN);
    }

    let mantissa = &text[..text.len() - last.len_utf8()];
    let exponent = if last == '.' { Some(0) } else { suffix_exponent(last) };
    match (exponent, mantissa.parse::<f64>()) {
        (Some(p), Ok(v)) => v * 10f64.powi(p),
        _ => f64::NAN,
    }
}

/// Format a number in engineering notation with 5 significant digits.
pub fn num2eng(n: f64) -> String {
    num2eng_digits(n, 5)
}

/// Format a number in engineering notation with `ndigits` significant digits.
pub fn num2eng_digits(n: f64, ndigits: usize) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n == 0.0 {
        return "0".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".into() } else { "-inf".into() };
    }

    let l = (n.abs().log10() / 3.0).floor() as i32;
    if l == 0 {
        return format_general(n, ndigits);
    }
    let l = l.clamp(-6, 6);
    let suffix = SUFFIXES.as_bytes()[(l + 6) as usize] as char;
    format!("{}{}", format_general(n / 1000f64.powi(l), ndigits), suffix)
}

/// `%g`-style formatting: `digits` significant digits, trailing zeros removed,
/// scientific notation only for very large or small magnitudes.
fn format_general(v: f64, digits: usize) -> String {
    let digits = digits.max(1);
    let sci = format!("{:.*e}", digits - 1, v);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= digits as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let decimals = (digits as i32 - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, v))
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

// ---------------------------------------------------------------------------
// nom combinators, shared by the expression parser
// ---------------------------------------------------------------------------

/// Unsigned decimal literal: `12`, `1.5`, `.5`, `2.`, `1e-3`.
fn unsigned_float(input: &str) -> IResult<&str, &str> {
    recognize((
        alt((recognize((digit1, opt((tag("."), digit0)))), recognize((tag("."), digit1)))),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)
}

/// Match an engineering suffix and return its multiplier.
fn eng_suffix(input: &str) -> IResult<&str, f64> {
    // Meg must come before M/m; a suffix may not run into an identifier.
    let (rest, exp) = alt((
        map(tag_no_case("MEG"), |_: &str| 6),
        map(one_of("afpnumkKMGTPE"), |c: char| suffix_exponent(c).unwrap_or(0)),
    ))
    .parse(input)?;
    let (rest, _) = not(peek(satisfy(|c: char| c.is_alphanumeric() || c == '_'))).parse(rest)?;
    Ok((rest, 10f64.powi(exp)))
}

/// Parse an unsigned numeric literal with optional engineering suffix.
pub fn eng_value(input: &str) -> IResult<&str, f64> {
    let (rest, digits) = unsigned_float(input)?;
    let (rest, multiplier) = opt(eng_suffix).parse(rest)?;
    let value = digits.parse::<f64>().map_err(|_| {
        nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))
    })?;
    Ok((rest, value * multiplier.unwrap_or(1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_eng2num_plain() {
        assert_eq!(eng2num("42"), 42.0);
        assert_eq!(eng2num("-3.5"), -3.5);
        assert_eq!(eng2num("1e-3"), 1e-3);
    }

    #[test]
    fn test_eng2num_suffixes() {
        assert_relative_eq!(eng2num("5M"), 5e6, max_relative = 1e-12);
        assert_relative_eq!(eng2num("5m"), 5e-3, max_relative = 1e-12);
        assert_relative_eq!(eng2num("10p"), 10e-12, max_relative = 1e-12);
        assert_relative_eq!(eng2num("4.7k"), 4700.0, max_relative = 1e-12);
        assert_relative_eq!(eng2num("4.7K"), 4700.0, max_relative = 1e-12);
        assert_relative_eq!(eng2num("2u"), 2e-6, max_relative = 1e-12);
        assert_relative_eq!(eng2num("3a"), 3e-18, max_relative = 1e-12);
        assert_relative_eq!(eng2num("1E"), 1e18, max_relative = 1e-12);
        assert_relative_eq!(eng2num("1Meg"), 1e6, max_relative = 1e-12);
        assert_relative_eq!(eng2num("2.2MEG"), 2.2e6, max_relative = 1e-12);
    }

    #[test]
    fn test_eng2num_invalid_is_nan() {
        assert!(eng2num("").is_nan());
        assert!(eng2num("abc").is_nan());
        assert!(eng2num("10x").is_nan());
        assert!(eng2num("K").is_nan());
        assert!(eng2num("1.2.3").is_nan());
    }

    #[test]
    fn test_num2eng_format() {
        assert_eq!(num2eng(0.0), "0");
        assert_eq!(num2eng(f64::NAN), "NaN");
        assert_eq!(num2eng(4700.0), "4.7K");
        assert_eq!(num2eng(5e6), "5M");
        assert_eq!(num2eng(10e-12), "10p");
        assert_eq!(num2eng(123.0), "123");
        assert_eq!(num2eng(1.0 / 3.0), "333.33m");
        assert_eq!(num2eng(-2.5e-9), "-2.5n");
    }

    #[test]
    fn test_round_trip_all_suffixes() {
        for exp in -18..=18 {
            for mantissa in [1.0, 1.234567891234, 9.87654321, 47.0, 330.5] {
                let x = mantissa * 10f64.powi(exp);
                let back = eng2num(&num2eng_digits(x, 15));
                assert_relative_eq!(back, x, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn test_eng_value_combinator() {
        let (rest, v) = eng_value("10p)").unwrap();
        assert_eq!(rest, ")");
        assert_relative_eq!(v, 10e-12, max_relative = 1e-12);

        let (rest, v) = eng_value("2*C1").unwrap();
        assert_eq!(rest, "*C1");
        assert_eq!(v, 2.0);

        let (_, v) = eng_value("1meg").unwrap();
        assert_relative_eq!(v, 1e6, max_relative = 1e-12);

        let (_, v) = eng_value("1.5e3").unwrap();
        assert_relative_eq!(v, 1500.0, max_relative = 1e-12);
    }

    #[test]
    fn test_eng_value_suffix_not_identifier() {
        // "2mx" is not 2 milli followed by x
        let (rest, v) = eng_value("2mx").unwrap();
        assert_eq!(v, 2.0);
        assert_eq!(rest, "mx");
    }
}
