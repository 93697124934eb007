//! Text syntax for algebraic expressions.
//!
//! ```text
//! sum    := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := ('-' | '+') unary | power
//! power  := atom (('^' | '**') unary)?
//! atom   := number | ident '(' sum ')' | ident | '(' sum ')'
//! ```
//!
//! Numbers accept engineering suffixes (`10p`, `4.7k`). The only function is
//! `sqrt`. Identifiers are returned as written; resolving them against a
//! symbol table is up to the caller.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{char, multispace0, one_of, satisfy};
use nom::combinator::{all_consuming, map, opt, recognize};
use nom::multi::many0;
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::{IResult, Parser};

use super::Expr;
use crate::numeng::eng_value;

/// Parse a complete expression.
pub fn parse_expr(text: &str) -> Result<Expr, String> {
    all_consuming(terminated(sum, multispace0))
        .parse(text)
        .map(|(_, e)| e)
        .map_err(|_| format!("cannot parse '{}'", text.trim()))
}

fn sum(input: &str) -> IResult<&str, Expr> {
    let (rest, first) = term(input)?;
    let (rest, tail) = many0(pair(preceded(multispace0, one_of("+-")), term)).parse(rest)?;
    let terms = std::iter::once(first).chain(
        tail.into_iter()
            .map(|(op, t)| if op == '-' { -t } else { t }),
    );
    Ok((rest, Expr::sum(terms)))
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (rest, first) = unary(input)?;
    let (rest, tail) = many0(pair(preceded(multispace0, one_of("*/")), unary)).parse(rest)?;
    let factors = std::iter::once(first).chain(
        tail.into_iter()
            .map(|(op, f)| if op == '/' { f.recip() } else { f }),
    );
    Ok((rest, Expr::product(factors)))
}

fn unary(input: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            map(preceded(char('-'), unary), |e: Expr| -e),
            preceded(char('+'), unary),
            power,
        )),
    )
    .parse(input)
}

fn power(input: &str) -> IResult<&str, Expr> {
    let (rest, base) = atom(input)?;
    let (rest, exponent) =
        opt(preceded((multispace0, alt((tag("**"), tag("^")))), unary)).parse(rest)?;
    match exponent {
        Some(e) => Ok((rest, Expr::pow(base, e))),
        None => Ok((rest, base)),
    }
}

fn atom(input: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            map(eng_value, Expr::Num),
            call_or_symbol,
            delimited(char('('), sum, preceded(multispace0, char(')'))),
        )),
    )
    .parse(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

fn call_or_symbol(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = identifier(input)?;
    let (rest, argument) = opt(preceded(
        multispace0,
        delimited(char('('), sum, preceded(multispace0, char(')'))),
    ))
    .parse(rest)?;
    match argument {
        None => Ok((rest, Expr::sym(name))),
        Some(arg) if name.eq_ignore_ascii_case("sqrt") => Ok((rest, arg.sqrt())),
        Some(_) => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_scaled_symbol() {
        let e = parse_expr("10*C1").unwrap();
        assert_eq!(e, Expr::Mul(vec![Expr::Num(10.0), Expr::sym("C1")]));
    }

    #[test]
    fn test_parse_precedence() {
        let e = parse_expr("1 + 2*3^2").unwrap();
        assert_eq!(e, Expr::Num(19.0));
        let e = parse_expr("2**3**2").unwrap();
        assert_eq!(e, Expr::Num(512.0));
        let e = parse_expr("-(1 - 4) / 2").unwrap();
        assert_eq!(e, Expr::Num(1.5));
    }

    #[test]
    fn test_parse_suffix_numbers() {
        let e = parse_expr("1k + 2").unwrap();
        assert_eq!(e, Expr::Num(1002.0));
        let e = parse_expr("C1 * 10p").unwrap();
        match e {
            Expr::Mul(f) => {
                assert_relative_eq!(f[0].as_number().unwrap(), 10e-12, max_relative = 1e-12);
                assert_eq!(f[1], Expr::sym("C1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_sqrt_and_division() {
        let e = parse_expr("K1*sqrt(L1*L2)").unwrap();
        assert!(e.depends_on("K1") && e.depends_on("L1") && e.depends_on("L2"));
        let e = parse_expr("1/(R1*C1)").unwrap();
        assert_eq!(e.to_string(), "1/(R1*C1)");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_expr("").is_err());
        assert!(parse_expr("C1 C2").is_err());
        assert!(parse_expr("foo(1)").is_err());
        assert!(parse_expr("(R1").is_err());
        assert!(parse_expr("2 *").is_err());
    }
}
