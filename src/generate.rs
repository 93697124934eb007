//! Netlist text regenerated from optimized values.

use std::collections::BTreeMap;

use crate::compiler::Circuit;
use crate::ir::ValueSpec;
use crate::numeng::num2eng;

/// Rewrite the circuit's netlist with `values`.
///
/// Free element lines get their value field replaced; an inline comment is
/// kept. Expression element lines lose any comment and get `; <value>`
/// appended. Every other line is copied verbatim.
pub fn generate(circuit: &Circuit, values: &BTreeMap<String, f64>) -> String {
    let netlist = &circuit.netlist;
    let resolved = circuit.resolve_values(values);
    let mut lines = netlist.lines.clone();

    for e in &netlist.elements {
        let Some(line) = lines.get_mut(e.line - 1) else {
            continue;
        };
        match &e.value {
            Some(ValueSpec::Free { .. }) => {
                let (Some(field), Some(v)) = (e.kind.value_field(), values.get(&e.id)) else {
                    continue;
                };
                let mut fields = e.fields.clone();
                fields[field] = num2eng(*v);
                let mut text = fields.join(" ");
                if let Some((_, comment)) = line.split_once(';') {
                    text.push_str(" ;");
                    text.push_str(comment);
                }
                *line = text;
            }
            Some(ValueSpec::Expression(_)) => {
                if let Some(v) = resolved.get(&e.id) {
                    *line = format!("{} ; {}", e.fields.join(" "), num2eng(*v));
                }
            }
            _ => {}
        }
    }

    lines.iter().map(|l| format!("{l}\n")).collect()
}
