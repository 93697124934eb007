//! Circuit intermediate representation.
//!
//! The parser produces a `Netlist`: the source lines, node and branch tables,
//! and one `Element` per element line. The compiler consumes it to build the
//! symbolic MNA matrices.

use std::collections::{BTreeMap, HashMap};

use serde_derive::Deserialize;

use crate::expr::Expr;

/// Index of the reference node in `Netlist::nodes`.
pub const GROUND: usize = 0;

/// Returns true if the node identifier represents ground.
pub fn is_ground(node: &str) -> bool {
    node == "0" || node.eq_ignore_ascii_case("GND")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Resistor,
    Inductor,
    Capacitor,
    VoltageSource,
    CurrentSource,
    /// E: voltage-controlled voltage source.
    Vcvs,
    /// F: current-controlled current source.
    Cccs,
    /// G: voltage-controlled current source.
    Vccs,
    /// H: current-controlled voltage source.
    Ccvs,
    /// O: ideal operational amplifier.
    OpAmp,
    /// K: mutual coupling between two inductors.
    Coupling,
    /// T: ideal transformer.
    Transformer,
}

impl ElementKind {
    pub fn from_letter(c: char) -> Option<Self> {
        Some(match c.to_ascii_uppercase() {
            'R' => Self::Resistor,
            'L' => Self::Inductor,
            'C' => Self::Capacitor,
            'V' => Self::VoltageSource,
            'I' => Self::CurrentSource,
            'E' => Self::Vcvs,
            'F' => Self::Cccs,
            'G' => Self::Vccs,
            'H' => Self::Ccvs,
            'O' => Self::OpAmp,
            'K' => Self::Coupling,
            'T' => Self::Transformer,
            _ => return None,
        })
    }

    pub fn letter(self) -> char {
        match self {
            Self::Resistor => 'R',
            Self::Inductor => 'L',
            Self::Capacitor => 'C',
            Self::VoltageSource => 'V',
            Self::CurrentSource => 'I',
            Self::Vcvs => 'E',
            Self::Cccs => 'F',
            Self::Vccs => 'G',
            Self::Ccvs => 'H',
            Self::OpAmp => 'O',
            Self::Coupling => 'K',
            Self::Transformer => 'T',
        }
    }

    /// Line syntax, quoted in `MalformedLine` errors.
    pub fn syntax(self) -> &'static str {
        match self {
            Self::Resistor => "Rnnn n+ n- value",
            Self::Inductor => "Lnnn n+ n- value",
            Self::Capacitor => "Cnnn n+ n- value",
            Self::VoltageSource => "Vnnn n+ n- value [AC v] [DC v]",
            Self::CurrentSource => "Innn n+ n- value [AC v] [DC v]",
            Self::Vcvs => "Ennn out+ out- ctl+ ctl- value",
            Self::Cccs => "Fnnn n+ n- ctl_elem value",
            Self::Vccs => "Gnnn out+ out- ctl+ ctl- value",
            Self::Ccvs => "Hnnn n+ n- ctl_elem value",
            Self::OpAmp => "Onnn in+ in- out",
            Self::Coupling => "Knnn ind1 ind2 value",
            Self::Transformer => "Tnnn n1+ n1- n2+ n2- value",
        }
    }

    /// Minimum number of whitespace-separated fields on the line.
    pub fn min_fields(self) -> usize {
        match self {
            Self::Cccs | Self::Ccvs => 5,
            Self::Vcvs | Self::Vccs | Self::Transformer => 6,
            _ => 4,
        }
    }

    /// Number of node fields following the element id.
    pub fn node_count(self) -> usize {
        match self {
            Self::Coupling => 0,
            Self::OpAmp => 3,
            Self::Vcvs | Self::Vccs | Self::Transformer => 4,
            _ => 2,
        }
    }

    /// Field index of the component value, for kinds that carry one.
    pub fn value_field(self) -> Option<usize> {
        match self {
            Self::Resistor | Self::Inductor | Self::Capacitor | Self::Coupling => Some(3),
            Self::Cccs | Self::Ccvs => Some(4),
            Self::Vcvs | Self::Vccs | Self::Transformer => Some(5),
            Self::VoltageSource | Self::CurrentSource | Self::OpAmp => None,
        }
    }

    pub fn is_source(self) -> bool {
        matches!(self, Self::VoltageSource | Self::CurrentSource)
    }

    /// Kinds whose current can control an F or H source.
    pub fn can_control(self) -> bool {
        matches!(
            self,
            Self::Resistor
                | Self::Capacitor
                | Self::Inductor
                | Self::VoltageSource
                | Self::Vcvs
                | Self::Ccvs
                | Self::OpAmp
        )
    }
}

/// A terminal reference. `inverted` is set by a leading `-` in the netlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    pub index: usize,
    pub inverted: bool,
}

impl NodeRef {
    pub fn is_ground(&self) -> bool {
        self.index == GROUND
    }
}

/// How an element's value enters the analysis, decided once at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSpec {
    /// `value*`: substituted before or after the solve.
    Fixed(f64),
    /// Plain value: a parameter of the output expression.
    Free { initial: f64, min: f64, max: f64 },
    /// `{expr}` over other element symbols.
    Expression(Expr),
}

/// DC/AC levels of an independent source.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SourceLevels {
    pub dc: Option<f64>,
    pub ac: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Upper-cased element id; also the element's symbol.
    pub id: String,
    pub kind: ElementKind,
    pub nodes: Vec<NodeRef>,
    /// Referenced elements: the controlling element of F/H, the inductors of K.
    pub refs: Vec<String>,
    /// 1-based source line.
    pub line: usize,
    pub fields: Vec<String>,
    /// `None` for opamps.
    pub value: Option<ValueSpec>,
    /// Levels of V and I sources.
    pub levels: Option<SourceLevels>,
}

impl Element {
    pub fn symbol(&self) -> Expr {
        Expr::sym(&self.id)
    }

    pub fn is_free(&self) -> bool {
        matches!(self.value, Some(ValueSpec::Free { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Default search bounds per element kind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BoundsTable {
    pub r: Range,
    pub l: Range,
    pub c: Range,
    pub e: Range,
    pub f: Range,
    pub g: Range,
    pub h: Range,
    pub k: Range,
    pub t: Range,
}

impl Default for BoundsTable {
    fn default() -> Self {
        Self {
            r: Range::new(1e-9, 1e9),
            l: Range::new(1e-9, 1.0),
            c: Range::new(10e-15, 1.0),
            e: Range::new(1e-6, 1e6),
            f: Range::new(1e-6, 1e6),
            g: Range::new(1e-6, 1e6),
            h: Range::new(1e-6, 1e6),
            k: Range::new(0.0, 1.0),
            t: Range::new(1e-3, 1e3),
        }
    }
}

impl BoundsTable {
    pub fn get(&self, kind: ElementKind) -> Option<Range> {
        match kind {
            ElementKind::Resistor => Some(self.r),
            ElementKind::Inductor => Some(self.l),
            ElementKind::Capacitor => Some(self.c),
            ElementKind::Vcvs => Some(self.e),
            ElementKind::Cccs => Some(self.f),
            ElementKind::Vccs => Some(self.g),
            ElementKind::Ccvs => Some(self.h),
            ElementKind::Coupling => Some(self.k),
            ElementKind::Transformer => Some(self.t),
            ElementKind::VoltageSource | ElementKind::CurrentSource | ElementKind::OpAmp => None,
        }
    }
}

/// A free component value the optimizer may adjust.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeParam {
    pub name: String,
    pub initial: f64,
    pub min: f64,
    pub max: f64,
}

/// A parsed netlist.
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    /// Source lines, verbatim.
    pub lines: Vec<String>,
    /// Node names; index 0 is ground.
    pub nodes: Vec<String>,
    /// Branch names (upper-cased) in allocation order.
    pub branches: Vec<String>,
    /// Elements in line order.
    pub elements: Vec<Element>,
}

impl Netlist {
    pub fn element(&self, id: &str) -> Option<&Element> {
        let id = id.to_uppercase();
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        if is_ground(name) {
            return Some(GROUND);
        }
        self.nodes.iter().position(|n| n == name)
    }

    pub fn branch_index(&self, name: &str) -> Option<usize> {
        let name = name.to_uppercase();
        self.branches.iter().position(|b| *b == name)
    }

    /// Number of non-ground nodes.
    pub fn n_nodes(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Number of unknowns: non-ground nodes followed by branches.
    pub fn size(&self) -> usize {
        self.n_nodes() + self.branches.len()
    }

    /// Row of a node in the unknown vector, `None` for ground.
    pub fn node_row(&self, node: usize) -> Option<usize> {
        node.checked_sub(1)
    }

    /// Row of a branch in the unknown vector.
    pub fn branch_row(&self, branch: usize) -> usize {
        self.n_nodes() + branch
    }

    pub fn sources(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| e.kind.is_source())
    }

    /// Free parameters in line order.
    pub fn free_params(&self) -> Vec<FreeParam> {
        self.elements
            .iter()
            .filter_map(|e| match e.value {
                Some(ValueSpec::Free { initial, min, max }) => Some(FreeParam {
                    name: e.id.clone(),
                    initial,
                    min,
                    max,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn initial_values(&self) -> HashMap<String, Expr> {
        self.free_params()
            .into_iter()
            .map(|p| (p.name, Expr::num(p.initial)))
            .collect()
    }

    /// Expression definitions with references to other expression elements
    /// expanded, and Fixed values substituted.
    fn resolved_definitions(&self) -> HashMap<String, Expr> {
        let mut defs: HashMap<String, Expr> = self
            .elements
            .iter()
            .filter_map(|e| match &e.value {
                Some(ValueSpec::Expression(expr)) => Some((e.id.clone(), expr.clone())),
                _ => None,
            })
            .collect();
        for _ in 0..defs.len() {
            if !defs
                .values()
                .any(|d| defs.keys().any(|k| d.depends_on(k)))
            {
                break;
            }
            let snapshot = defs.clone();
            for def in defs.values_mut() {
                *def = def.subs(&snapshot);
            }
        }
        let fixed = self.fixed_values();
        defs.into_iter()
            .map(|(k, v)| (k, v.subs(&fixed)))
            .collect()
    }

    /// Fixed component values. Source levels are not included.
    pub fn fixed_values(&self) -> HashMap<String, Expr> {
        self.elements
            .iter()
            .filter(|e| !e.kind.is_source())
            .filter_map(|e| match e.value {
                Some(ValueSpec::Fixed(v)) => Some((e.id.clone(), Expr::num(v))),
                _ => None,
            })
            .collect()
    }

    /// Substitutions applied around the solve: Fixed values, resolved
    /// expressions, and every independent source except `input` set to zero.
    pub fn substitution_map(&self, input: &str) -> HashMap<String, Expr> {
        let input = input.to_uppercase();
        let mut map = self.fixed_values();
        map.extend(self.resolved_definitions());
        for source in self.sources().filter(|s| s.id != input) {
            map.insert(source.id.clone(), Expr::zero());
        }
        map
    }

    /// Numeric values of every Fixed, Free and Expression element. Free
    /// values come from `assignment`, falling back to their initial value.
    /// Expressions that cannot be resolved (cyclic definitions) are omitted.
    pub fn resolve_values(&self, assignment: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        let mut known: HashMap<String, f64> = HashMap::new();
        let mut pending = Vec::new();
        for e in &self.elements {
            match &e.value {
                Some(ValueSpec::Fixed(v)) if !e.kind.is_source() => {
                    known.insert(e.id.clone(), *v);
                }
                Some(ValueSpec::Free { initial, .. }) => {
                    let v = assignment.get(&e.id).copied().unwrap_or(*initial);
                    known.insert(e.id.clone(), v);
                }
                Some(ValueSpec::Expression(expr)) => pending.push((e.id.clone(), expr)),
                _ => {}
            }
        }
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|(id, expr)| match expr.eval_real(&known) {
                Some(v) => {
                    known.insert(id.clone(), v);
                    false
                }
                None => true,
            });
            if pending.len() == before {
                break;
            }
        }
        known.into_iter().collect()
    }
}
