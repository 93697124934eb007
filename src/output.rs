//! Results output formatting (CSV).

use std::io::Write;

use crate::analysis::{MagnitudeMode, Response};
use crate::error::Result;
use crate::optim::Target;

fn magnitude_column(mode: MagnitudeMode) -> &'static str {
    match mode {
        MagnitudeMode::Decibel => "Magnitude_dB",
        MagnitudeMode::Linear => "Magnitude",
    }
}

/// Write a frequency response as CSV.
///
/// Format:
/// ```csv
/// Frequency,Magnitude_dB,Phase_deg
/// 1000,-0.17,-11.3
/// 3183.1,-3.01,-45.0
/// ```
pub fn write_response_csv<W: Write>(response: &Response, writer: &mut W) -> Result<()> {
    writeln!(writer, "Frequency,{},Phase_deg", magnitude_column(response.mode))?;
    for i in 0..response.len() {
        writeln!(
            writer,
            "{},{},{}",
            response.frequencies[i], response.magnitude[i], response.phase_deg[i]
        )?;
    }
    Ok(())
}

/// Write the target next to the initial and fitted responses, all in dB.
///
/// Rows follow the target's frequency axis; both responses must be sampled
/// on the same axis.
pub fn write_fit_csv<W: Write>(
    target: &Target,
    initial: &Response,
    fitted: &Response,
    writer: &mut W,
) -> Result<()> {
    writeln!(
        writer,
        "Frequency,Target_dB,Target_phase_deg,Initial_dB,Initial_phase_deg,Fitted_dB,Fitted_phase_deg"
    )?;
    let (initial_db, fitted_db) = (initial.magnitude_db(), fitted.magnitude_db());
    for (i, f) in target.frequencies.iter().enumerate() {
        writeln!(
            writer,
            "{},{},{},{},{},{},{}",
            f,
            target.magnitude_db[i],
            target.phase_deg[i],
            initial_db[i],
            initial.phase_deg[i],
            fitted_db[i],
            fitted.phase_deg[i]
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(mode: MagnitudeMode) -> Response {
        Response {
            frequencies: vec![10.0, 100.0],
            magnitude: vec![1.0, 0.5],
            phase_deg: vec![0.0, -45.0],
            mode,
        }
    }

    #[test]
    fn test_response_csv() {
        let mut out = Vec::new();
        write_response_csv(&response(MagnitudeMode::Linear), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "Frequency,Magnitude,Phase_deg\n10,1,0\n100,0.5,-45\n");
    }

    #[test]
    fn test_fit_csv_converts_to_db() {
        let target = Target {
            frequencies: vec![10.0, 100.0],
            magnitude_db: vec![0.0, -3.0],
            phase_deg: vec![0.0, -45.0],
        };
        let lin = response(MagnitudeMode::Linear);
        let mut out = Vec::new();
        write_fit_csv(&target, &lin, &lin, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("Frequency,Target_dB"));
        assert!(rows[1].starts_with("10,0,0,0,0,0,0"));
    }
}
