//! Input and output selection.
//!
//! Output selectors have the form `Q(a[,b])` with `Q` one of V, I, Z, Y, L,
//! C (any case):
//!
//! - `V(n)`, `V(p,n)`: node voltage or voltage between two nodes
//! - `V(elem)`: voltage across an element's first two terminals
//! - `I(x)`: current of a branch, or through a resistor or capacitor
//! - `Z/Y/L/C(src)`: impedance, admittance, equivalent inductance and
//!   equivalent capacitance seen by the input source
//!
//! V and I outputs are divided by the input source symbol.

use nom::character::complete::{char, multispace0, one_of};
use nom::combinator::rest;
use nom::sequence::{delimited, terminated};
use nom::{IResult, Parser};

use crate::compiler::Circuit;
use crate::error::SelectorError;
use crate::expr::rational::{AtomTable, Rational};
use crate::expr::Expr;
use crate::ir::{Element, ElementKind, Netlist, GROUND};
use crate::solver::SystemSolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Current,
    Impedance,
    Admittance,
    Inductance,
    Capacitance,
}

impl Quantity {
    fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'V' => Some(Quantity::Voltage),
            'I' => Some(Quantity::Current),
            'Z' => Some(Quantity::Impedance),
            'Y' => Some(Quantity::Admittance),
            'L' => Some(Quantity::Inductance),
            'C' => Some(Quantity::Capacitance),
            _ => None,
        }
    }
}

/// A parsed output selector.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub text: String,
    pub quantity: Quantity,
    pub first: String,
    /// Text after the comma, if there is one (possibly empty).
    pub second: Option<String>,
}

fn prefix(input: &str) -> IResult<&str, char> {
    terminated(
        delimited(multispace0, one_of("VIZYLCvizylc"), multispace0),
        char('('),
    )
    .parse(input)
}

/// Parse an output selector.
pub fn parse_selector(text: &str) -> Result<Selector, SelectorError> {
    let malformed = || SelectorError::MalformedSelector(text.to_string());
    let (body, letter) = (prefix, rest)
        .parse(text)
        .map(|(_, (letter, body))| (body, letter))
        .map_err(|_: nom::Err<nom::error::Error<&str>>| malformed())?;
    let quantity = Quantity::from_letter(letter).ok_or_else(malformed)?;
    let inner = body.trim_end().strip_suffix(')').ok_or_else(malformed)?;

    let (first, second) = match inner.split_once(',') {
        Some((a, b)) => (a, Some(b.trim().to_string())),
        None => (inner, None),
    };
    let first = first.trim();
    if first.is_empty() {
        return Err(malformed());
    }
    Ok(Selector {
        text: text.to_string(),
        quantity,
        first: first.to_string(),
        second,
    })
}

/// The independent source named `input`.
pub fn input_source<'a>(netlist: &'a Netlist, input: &str) -> Result<&'a Element, SelectorError> {
    netlist
        .element(input.trim())
        .filter(|e| e.kind.is_source())
        .ok_or_else(|| SelectorError::InvalidInput(input.to_string()))
}

/// Output expressions are built as rational functions over a private copy
/// of the solution's atoms.
struct Builder<'a> {
    netlist: &'a Netlist,
    solution: &'a SystemSolution,
    atoms: AtomTable,
}

impl<'a> Builder<'a> {
    fn symbol(&mut self, expr: &Expr) -> Rational {
        Rational::from_expr(expr, &mut self.atoms)
    }

    fn node_voltage(&self, node: usize) -> Rational {
        match self.netlist.node_row(node) {
            Some(row) => self.solution.rational(row).clone(),
            None => Rational::zero(),
        }
    }

    fn branch_current(&self, branch: usize) -> Rational {
        self.solution
            .rational(self.netlist.branch_row(branch))
            .clone()
    }

    /// `V(p) - inv·V(n)` over the element's first two terminals.
    fn across(&self, element: &Element) -> Rational {
        let (p, n) = (element.nodes[0], element.nodes[1]);
        let vn = self.node_voltage(n.index);
        let vn = if p.inverted != n.inverted { vn.neg() } else { vn };
        self.node_voltage(p.index).sub(&vn)
    }

    fn voltage(&mut self, sel: &Selector) -> Result<Rational, SelectorError> {
        if let Some(p) = self.netlist.node_index(&sel.first) {
            let n = match sel.second.as_deref() {
                None => GROUND,
                Some("") => return Err(SelectorError::MalformedSelector(sel.text.clone())),
                Some(name) => self
                    .netlist
                    .node_index(name)
                    .ok_or_else(|| SelectorError::UnknownNode(name.to_string()))?,
            };
            if p == n {
                return Err(SelectorError::ZeroOutput(sel.text.clone()));
            }
            return Ok(self.node_voltage(p).sub(&self.node_voltage(n)));
        }
        let netlist = self.netlist;
        match netlist.element(&sel.first) {
            Some(e) if has_voltage(e.kind) => {
                if sel.second.is_some() {
                    return Err(SelectorError::MalformedSelector(sel.text.clone()));
                }
                Ok(self.across(e))
            }
            _ => Err(SelectorError::UnknownNode(sel.first.clone())),
        }
    }

    fn current(&mut self, sel: &Selector) -> Result<Rational, SelectorError> {
        if sel.second.is_some() {
            return Err(SelectorError::MalformedSelector(sel.text.clone()));
        }
        if let Some(b) = self.netlist.branch_index(&sel.first) {
            return Ok(self.branch_current(b));
        }
        let netlist = self.netlist;
        let unknown = || SelectorError::UnknownElement(sel.first.clone());
        let element = netlist.element(&sel.first).ok_or_else(unknown)?;
        let across = self.across(element);
        let value = self.symbol(&element.symbol());
        match element.kind {
            ElementKind::Resistor => across.div(&value).ok_or_else(unknown),
            ElementKind::Capacitor => {
                let s = self.symbol(&Expr::s());
                Ok(across.mul(&s).mul(&value))
            }
            _ => Err(unknown()),
        }
    }

    /// Impedance seen by the input source.
    fn impedance(&mut self, sel: &Selector, input: &Element) -> Result<Rational, SelectorError> {
        if sel.second.is_some() {
            return Err(SelectorError::MalformedSelector(sel.text.clone()));
        }
        let netlist = self.netlist;
        let probed = netlist
            .element(&sel.first)
            .filter(|e| e.kind.is_source())
            .ok_or_else(|| SelectorError::UnknownElement(sel.first.clone()))?;
        if probed.kind != input.kind {
            return Err(SelectorError::TypeMismatch {
                probe: sel.text.clone(),
                probed: probed.kind.letter(),
                input: input.kind.letter(),
            });
        }
        if probed.id != input.id {
            return Err(SelectorError::InvalidOutput(sel.text.clone()));
        }

        let zero = || SelectorError::ZeroOutput(sel.text.clone());
        let source = self.symbol(&input.symbol());
        match input.kind {
            ElementKind::VoltageSource => {
                let branch = netlist
                    .branch_index(&input.id)
                    .ok_or_else(|| SelectorError::UnknownElement(input.id.clone()))?;
                // the branch current flows into the source at its + terminal
                let delivered = self.branch_current(branch).neg();
                source.div(&delivered).ok_or_else(zero)
            }
            _ => {
                let v = self
                    .node_voltage(input.nodes[0].index)
                    .sub(&self.node_voltage(input.nodes[1].index));
                v.div(&source).ok_or_else(zero)
            }
        }
    }
}

fn has_voltage(kind: ElementKind) -> bool {
    use ElementKind::*;
    matches!(
        kind,
        Resistor | Inductor | Capacitor | VoltageSource | CurrentSource | Vcvs | Cccs | Vccs | Ccvs
    )
}

/// Build the output expression `sel` for a solved system driven by `input`.
pub fn build_output_expression(
    netlist: &Netlist,
    sel: &Selector,
    input: &Element,
    solution: &SystemSolution,
) -> Result<Expr, SelectorError> {
    let mut b = Builder {
        netlist,
        solution,
        atoms: solution.atoms().clone(),
    };
    let zero = || SelectorError::ZeroOutput(sel.text.clone());

    let value = match sel.quantity {
        Quantity::Voltage | Quantity::Current => {
            let raw = if sel.quantity == Quantity::Voltage {
                b.voltage(sel)?
            } else {
                b.current(sel)?
            };
            let source = b.symbol(&input.symbol());
            raw.div(&source).ok_or_else(zero)?
        }
        Quantity::Impedance => b.impedance(sel, input)?,
        Quantity::Admittance => b.impedance(sel, input)?.recip().ok_or_else(zero)?,
        Quantity::Inductance => {
            let s = b.symbol(&Expr::s());
            b.impedance(sel, input)?.div(&s).ok_or_else(zero)?
        }
        Quantity::Capacitance => {
            let s = b.symbol(&Expr::s());
            s.mul(&b.impedance(sel, input)?).recip().ok_or_else(zero)?
        }
    };
    Ok(value.to_expr(&b.atoms))
}

/// Inputs (independent sources) and outputs that can be selected for a
/// circuit.
pub fn list_candidate_io_expressions(circuit: &Circuit) -> (Vec<String>, Vec<String>) {
    let netlist = &circuit.netlist;
    let mut inputs = Vec::new();
    let mut outputs: Vec<String> = netlist
        .nodes
        .iter()
        .skip(1)
        .map(|n| format!("V({n})"))
        .collect();

    for e in &netlist.elements {
        match e.kind {
            ElementKind::VoltageSource => {
                inputs.push(e.id.clone());
                outputs.push(format!("I({})", e.id));
                outputs.push(format!("Z({})", e.id));
            }
            ElementKind::CurrentSource => {
                inputs.push(e.id.clone());
                outputs.push(format!("V({})", e.id));
                outputs.push(format!("Z({})", e.id));
            }
            kind if has_voltage(kind) => {
                outputs.push(format!("V({})", e.id));
                let tracked = netlist.branch_index(&e.id).is_some();
                if tracked || matches!(kind, ElementKind::Resistor | ElementKind::Capacitor) {
                    outputs.push(format!("I({})", e.id));
                }
            }
            _ => {}
        }
    }
    (inputs, outputs)
}
