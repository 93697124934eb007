//! Netlist parser.
//!
//! ```text
//! ; comment (also lines starting with *, # or /)
//! Rname n+ n- value [min=v] [max=v]
//! Vname n+ n- value [AC v] [DC v]
//! Ename out+ out- ctl+ ctl- value
//! Fname n+ n- ctl_elem value
//! Oname in+ in- out
//! Kname ind1 ind2 value
//! Tname n1+ n1- n2+ n2- value
//! ```
//!
//! Values are `value` (free, searched within bounds), `value*` (fixed) or
//! `{expr}` (an expression over other element ids). A leading `-` on a node
//! marks it inverted.
//!
//! Parsing takes two passes. The first registers elements, nodes and branches
//! in order of appearance; the second parses values, since an expression may
//! reference an element declared further down.

use nom::branch::alt;
use nom::bytes::complete::tag_no_case;
use nom::character::complete::char;
use nom::combinator::rest;
use nom::sequence::separated_pair;
use nom::{IResult, Parser};

use std::collections::HashMap;

use crate::error::ParseError;
use crate::expr::parse::parse_expr;
use crate::expr::Expr;
use crate::ir::{
    is_ground, BoundsTable, Element, ElementKind, Netlist, NodeRef, SourceLevels, ValueSpec,
    GROUND,
};
use crate::numeng::eng2num;

const COMMENT_PREFIXES: [char; 4] = [';', '*', '#', '/'];

/// Parse a netlist with the default bounds table.
pub fn parse(input: &str) -> Result<Netlist, ParseError> {
    parse_with(input, &BoundsTable::default())
}

/// Parse a netlist, taking default search bounds from `bounds`.
pub fn parse_with(input: &str, bounds: &BoundsTable) -> Result<Netlist, ParseError> {
    let mut netlist = Netlist {
        lines: input.lines().map(str::to_string).collect(),
        nodes: vec!["0".to_string()],
        ..Default::default()
    };

    for (line_num, raw_line) in input.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(COMMENT_PREFIXES) {
            continue;
        }
        let content = line.split(';').next().unwrap_or_default();
        let fields: Vec<&str> = content.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        register_element(&mut netlist, &fields, line_num + 1)?;
    }

    check_references(&netlist)?;

    let values = netlist
        .elements
        .iter()
        .map(|e| element_value(e, &netlist, bounds))
        .collect::<Result<Vec<_>, _>>()?;
    for (element, (value, levels)) in netlist.elements.iter_mut().zip(values) {
        element.value = value;
        element.levels = levels;
    }

    if netlist.elements.is_empty() || netlist.n_nodes() == 0 {
        return Err(ParseError::EmptyCircuit);
    }

    tracing::debug!(
        elements = netlist.elements.len(),
        nodes = netlist.n_nodes(),
        branches = netlist.branches.len(),
        "netlist parsed"
    );
    Ok(netlist)
}

// ---------------------------------------------------------------------------
// First pass: elements, nodes, branches
// ---------------------------------------------------------------------------

fn register_element(netlist: &mut Netlist, fields: &[&str], line: usize) -> Result<(), ParseError> {
    let name = fields[0];
    let letter = name.chars().next().unwrap_or(' ');
    let kind = ElementKind::from_letter(letter).ok_or(ParseError::UnknownElementKind {
        line,
        kind: letter,
    })?;
    if name.chars().count() < 2 || fields.len() < kind.min_fields() {
        return Err(ParseError::MalformedLine {
            line,
            expected: kind.syntax(),
        });
    }

    let id = name.to_uppercase();
    if netlist.element(&id).is_some() {
        return Err(ParseError::DuplicateElement { line, name: id });
    }

    let nodes = fields[1..=kind.node_count()]
        .iter()
        .map(|f| add_node(netlist, f))
        .collect();

    let refs: Vec<String> = match kind {
        ElementKind::Cccs | ElementKind::Ccvs => vec![fields[3].to_uppercase()],
        ElementKind::Coupling => vec![fields[1].to_uppercase(), fields[2].to_uppercase()],
        _ => Vec::new(),
    };

    // Sensed currents first, then the element's own branches.
    for r in &refs {
        add_branch(netlist, r);
    }
    match kind {
        ElementKind::VoltageSource
        | ElementKind::Vcvs
        | ElementKind::Ccvs
        | ElementKind::Inductor
        | ElementKind::OpAmp => add_branch(netlist, &id),
        ElementKind::Transformer => {
            add_branch(netlist, &format!("{}_1", id));
            add_branch(netlist, &format!("{}_2", id));
        }
        _ => {}
    }

    netlist.elements.push(Element {
        id,
        kind,
        nodes,
        refs,
        line,
        fields: fields.iter().map(|f| f.to_string()).collect(),
        value: None,
        levels: None,
    });
    Ok(())
}

fn add_node(netlist: &mut Netlist, field: &str) -> NodeRef {
    let (inverted, name) = match field.strip_prefix('-') {
        Some(stripped) => (true, stripped),
        None => (false, field),
    };
    let index = if is_ground(name) {
        GROUND
    } else if let Some(i) = netlist.nodes.iter().position(|n| n == name) {
        i
    } else {
        netlist.nodes.push(name.to_string());
        netlist.nodes.len() - 1
    };
    NodeRef { index, inverted }
}

fn add_branch(netlist: &mut Netlist, name: &str) {
    if !netlist.branches.iter().any(|b| b == name) {
        netlist.branches.push(name.to_string());
    }
}

fn check_references(netlist: &Netlist) -> Result<(), ParseError> {
    for e in &netlist.elements {
        match e.kind {
            ElementKind::Cccs | ElementKind::Ccvs => {
                let control = &e.refs[0];
                if !netlist
                    .element(control)
                    .is_some_and(|c| c.kind.can_control())
                {
                    return Err(ParseError::UnknownControl {
                        line: e.line,
                        name: control.clone(),
                    });
                }
            }
            ElementKind::Coupling => {
                for name in &e.refs {
                    if !netlist
                        .element(name)
                        .is_some_and(|l| l.kind == ElementKind::Inductor)
                    {
                        return Err(ParseError::UnknownInductor {
                            line: e.line,
                            name: name.clone(),
                        });
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Second pass: values
// ---------------------------------------------------------------------------

type ParsedValue = (Option<ValueSpec>, Option<SourceLevels>);

fn element_value(e: &Element, netlist: &Netlist, bounds: &BoundsTable) -> Result<ParsedValue, ParseError> {
    if e.kind.is_source() {
        let levels = parse_levels(&e.fields[3..], e.line)?;
        let value = levels.dc.or(levels.ac).unwrap_or(0.0);
        return Ok((Some(ValueSpec::Fixed(value)), Some(levels)));
    }
    let Some(field) = e.kind.value_field() else {
        return Ok((None, None));
    };
    let text = e.fields[field].as_str();

    if text.contains('{') || text.contains('}') {
        return parse_expression_value(text, netlist, e.line).map(|v| (Some(v), None));
    }

    if text.contains('*') {
        let v = parse_number(&text.replace('*', ""), e.line)?;
        return Ok((Some(ValueSpec::Fixed(v)), None));
    }

    let initial = parse_number(text, e.line)?;
    let range = bounds.get(e.kind).unwrap_or(crate::ir::Range::new(f64::MIN, f64::MAX));
    let (mut min, mut max) = (range.min, range.max);
    for field in &e.fields[field + 1..] {
        if let Ok((_, (key, value))) = bound_option(field) {
            let v = parse_number(value, e.line)?;
            if key.eq_ignore_ascii_case("min") {
                min = v;
            } else {
                max = v;
            }
        }
    }
    Ok((Some(ValueSpec::Free { initial, min, max }), None))
}

fn parse_number(text: &str, line: usize) -> Result<f64, ParseError> {
    let v = eng2num(text);
    if v.is_nan() {
        return Err(ParseError::InvalidValue {
            line,
            text: text.to_string(),
        });
    }
    Ok(v)
}

/// `min=value` or `max=value`.
fn bound_option(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(alt((tag_no_case("min"), tag_no_case("max"))), char('='), rest).parse(input)
}

fn parse_expression_value(text: &str, netlist: &Netlist, line: usize) -> Result<ValueSpec, ParseError> {
    let invalid = || ParseError::InvalidExpression {
        line,
        text: text.to_string(),
    };
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .filter(|t| !t.contains(['{', '}']))
        .ok_or_else(invalid)?;
    let expr = parse_expr(inner).map_err(|_| invalid())?;

    // Element ids are case-insensitive; symbols are stored upper-cased.
    let mut rename: HashMap<String, Expr> = HashMap::new();
    for name in expr.free_symbols() {
        let upper = name.to_uppercase();
        if netlist.element(&upper).is_none() {
            return Err(ParseError::UnknownVariable { line, name });
        }
        rename.insert(name, Expr::sym(upper));
    }
    Ok(ValueSpec::Expression(expr.subs(&rename)))
}

/// Source levels: an untagged first value is DC, `AC v` and `DC v` tag.
fn parse_levels(tokens: &[String], line: usize) -> Result<SourceLevels, ParseError> {
    let mut levels = SourceLevels::default();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].as_str();
        if bound_option(token).is_ok() {
            i += 1;
            continue;
        }
        let is_ac = token.eq_ignore_ascii_case("AC");
        if is_ac || token.eq_ignore_ascii_case("DC") {
            let value = tokens.get(i + 1).ok_or_else(|| ParseError::InvalidValue {
                line,
                text: token.to_string(),
            })?;
            let v = parse_number(&value.replace('*', ""), line)?;
            if is_ac {
                levels.ac = Some(v);
            } else {
                levels.dc = Some(v);
            }
            i += 2;
        } else if i == 0 {
            levels.dc = Some(parse_number(&token.replace('*', ""), line)?);
            i += 1;
        } else {
            return Err(ParseError::InvalidValue {
                line,
                text: token.to_string(),
            });
        }
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free(e: &Element) -> (f64, f64, f64) {
        match e.value {
            Some(ValueSpec::Free { initial, min, max }) => (initial, min, max),
            ref other => panic!("expected free value, got {:?}", other),
        }
    }

    // ---- Element lines ----

    #[test]
    fn test_parse_rc_lowpass() {
        let netlist = parse("Vin 1 0 1 AC 1\nR1 out 1 5M\nC1 out 0 10p\n").unwrap();
        assert_eq!(netlist.elements.len(), 3);
        assert_eq!(netlist.nodes, vec!["0", "1", "out"]);
        assert_eq!(netlist.branches, vec!["VIN"]);
        assert_eq!(netlist.size(), 3);

        let r1 = netlist.element("r1").unwrap();
        assert_eq!(r1.kind, ElementKind::Resistor);
        assert_eq!(r1.line, 2);
        assert_eq!(r1.nodes[0].index, 2);
        assert_eq!(r1.nodes[1].index, 1);
        let (initial, min, max) = free(r1);
        assert!((initial - 5e6).abs() < 1e-6);
        assert_eq!((min, max), (1e-9, 1e9));
    }

    #[test]
    fn test_parse_source_levels() {
        let netlist = parse("V1 1 0 2 AC 1\nI1 0 1 AC 3m DC 1\nR1 1 0 1k").unwrap();
        let v1 = netlist.element("V1").unwrap();
        assert_eq!(
            v1.levels,
            Some(SourceLevels {
                dc: Some(2.0),
                ac: Some(1.0)
            })
        );
        let i1 = netlist.element("I1").unwrap();
        let levels = i1.levels.unwrap();
        assert_eq!(levels.dc, Some(1.0));
        assert!((levels.ac.unwrap() - 3e-3).abs() < 1e-15);
        assert_eq!(netlist.branches, vec!["V1"]);
    }

    #[test]
    fn test_parse_fixed_and_expression() {
        let netlist = parse("V1 1 0 1\nR1 1 2 1k*\nC1 2 0 1n\nC2 2 0 {10*c1}\n").unwrap();
        assert_eq!(netlist.element("R1").unwrap().value, Some(ValueSpec::Fixed(1000.0)));
        match &netlist.element("C2").unwrap().value {
            Some(ValueSpec::Expression(e)) => {
                assert_eq!(*e, Expr::num(10.0) * Expr::sym("C1"));
            }
            other => panic!("expected expression, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bound_overrides() {
        let netlist = parse("V1 1 0 1\nR1 1 2 1k max=10M\nC1 2 0 10p min=1p max=100p\nC2 2 0 1n").unwrap();
        let (_, min, max) = free(netlist.element("R1").unwrap());
        assert_eq!((min, max), (1e-9, 10e6));
        let (_, min, max) = free(netlist.element("C1").unwrap());
        assert!((min - 1e-12).abs() < 1e-24 && (max - 100e-12).abs() < 1e-24);
        let (_, min, max) = free(netlist.element("C2").unwrap());
        assert_eq!((min, max), (10e-15, 1.0));
    }

    #[test]
    fn test_parse_controlled_sources_and_branches() {
        let text = "V1 1 0 1\nR1 1 2 1k\nF1 2 0 R1 10\nH1 3 0 V1 5\nR2 3 0 1k\nE1 4 0 2 0 2\nR3 4 0 1k";
        let netlist = parse(text).unwrap();
        // sensing branch R1 before H1's own branch
        assert_eq!(netlist.branches, vec!["V1", "R1", "H1", "E1"]);
        assert_eq!(netlist.element("F1").unwrap().refs, vec!["R1"]);
    }

    #[test]
    fn test_parse_transformer_and_coupling() {
        let text = "V1 1 0 1\nL1 1 0 1m\nL2 2 0 4m\nK1 L1 L2 0.9\nT1 2 0 3 0 2\nR1 3 0 50";
        let netlist = parse(text).unwrap();
        assert_eq!(netlist.branches, vec!["V1", "L1", "L2", "T1_1", "T1_2"]);
        let (k, _, _) = free(netlist.element("K1").unwrap());
        assert!((k - 0.9).abs() < 1e-15);
    }

    #[test]
    fn test_inverted_node() {
        let netlist = parse("V1 1 0 1\nR1 -1 2 1k\nR2 2 0 1k").unwrap();
        let r1 = netlist.element("R1").unwrap();
        assert!(r1.nodes[0].inverted);
        assert_eq!(netlist.nodes, vec!["0", "1", "2"]);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let text = "; title\n* spice comment\n\n# hash\n/ slash\nV1 1 0 1 ; source\nR1 1 0 1k";
        let netlist = parse(text).unwrap();
        assert_eq!(netlist.elements.len(), 2);
        assert_eq!(netlist.lines.len(), 7);
    }

    // ---- Errors ----

    #[test]
    fn test_unknown_element_kind() {
        let err = parse("V1 1 0 1\nX1 1 0 1k").unwrap_err();
        assert_eq!(err, ParseError::UnknownElementKind { line: 2, kind: 'X' });
    }

    #[test]
    fn test_malformed_lines() {
        let err = parse("R 1 0 1k").unwrap_err();
        assert!(matches!(err, ParseError::MalformedLine { line: 1, .. }));
        let err = parse("V1 1 0 1\nE1 2 0 1 0").unwrap_err();
        assert_eq!(
            err,
            ParseError::MalformedLine {
                line: 2,
                expected: ElementKind::Vcvs.syntax()
            }
        );
    }

    #[test]
    fn test_invalid_values() {
        let err = parse("V1 1 0 1\nR1 1 0 1x").unwrap_err();
        assert_eq!(err, ParseError::InvalidValue { line: 2, text: "1x".into() });
        let err = parse("V1 1 0 1\nR1 1 0 {2*}").unwrap_err();
        assert!(matches!(err, ParseError::InvalidExpression { line: 2, .. }));
        let err = parse("V1 1 0 1\nR1 1 0 {2*R9}").unwrap_err();
        assert_eq!(err, ParseError::UnknownVariable { line: 2, name: "R9".into() });
    }

    #[test]
    fn test_unknown_control_and_inductor() {
        let err = parse("V1 1 0 1\nR1 1 0 1k\nF1 1 0 I9 2").unwrap_err();
        assert_eq!(err, ParseError::UnknownControl { line: 3, name: "I9".into() });
        let err = parse("V1 1 0 1\nL1 1 0 1m\nR2 1 0 1k\nK1 L1 R2 0.5").unwrap_err();
        assert_eq!(err, ParseError::UnknownInductor { line: 4, name: "R2".into() });
    }

    #[test]
    fn test_empty_circuit() {
        assert_eq!(parse("; nothing\n").unwrap_err(), ParseError::EmptyCircuit);
        assert_eq!(parse("R1 0 gnd 1k").unwrap_err(), ParseError::EmptyCircuit);
    }

    #[test]
    fn test_duplicate_element() {
        let err = parse("V1 1 0 1\nR1 1 0 1k\nr1 1 0 2k").unwrap_err();
        assert_eq!(err, ParseError::DuplicateElement { line: 3, name: "R1".into() });
    }
}
