//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{DatasetFit, FitConfig, RunOutput};
use crate::report::mask_range;

/// Format the full run summary (input + settings + per-dataset results).
pub fn format_run_summary(run: &RunOutput, config: &FitConfig) -> String {
    let spectrum = &run.spectrum;
    let mut out = String::new();

    out.push_str("=== xfit - Exciton + Continuum Absorption Fit ===\n");
    out.push_str(&format!("Input: {}\n", spectrum.name));
    out.push_str(&format!(
        "Axis: {} ({}) | points={} | datasets={}\n",
        spectrum.unit.label(),
        spectrum.orientation.label(),
        spectrum.len(),
        spectrum.dataset_count()
    ));
    out.push_str(&format!(
        "Baseline: {} | auto-range: {} | warm start: {}\n",
        config.baseline_mode.display_name(),
        on_off(config.auto_range),
        on_off(config.warm_start)
    ));
    if config.min_energy.is_some() || config.max_energy.is_some() {
        out.push_str(&format!(
            "Energy limits: [{}, {}] eV\n",
            config.min_energy.map(|v| format!("{v:.3}")).unwrap_or_else(|| "-".to_string()),
            config.max_energy.map(|v| format!("{v:.3}")).unwrap_or_else(|| "-".to_string()),
        ));
    }

    out.push('\n');
    out.push_str(&format_parameter_table(&run.fits));

    for fit in &run.fits {
        out.push('\n');
        out.push_str(&format_dataset(fit, &spectrum.energy));
    }

    out
}

/// One row per dataset with the fitted parameters.
pub fn format_parameter_table(fits: &[DatasetFit]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<8} {:>9} {:>9} {:>9} {:>10} {:>8} {:>7} {:>7} {:>8}",
            "dataset", "Eg(eV)", "Eb(meV)", "Gamma", "ucvsq", "mhcnp", "q", "Deff", "R2"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(&format!(
        "{:-<8} {:-<9} {:-<9} {:-<9} {:-<10} {:-<8} {:-<7} {:-<7} {:-<8}\n",
        "", "", "", "", "", "", "", "", ""
    ));

    for fit in fits {
        let p = &fit.params;
        out.push_str(&format!(
            "{:<8} {:>9.4} {:>9.2} {:>9.4} {:>10.3} {:>8.4} {:>7.3} {:>7.3} {:>8.4}\n",
            fit.dataset,
            p.eg,
            p.eb * 1000.0,
            p.gamma,
            p.ucvsq,
            p.mhcnp,
            p.q,
            p.deff(),
            fit.r_squared
        ));
    }
    out
}

/// Detailed block for one dataset.
pub fn format_dataset(fit: &DatasetFit, energy: &[f64]) -> String {
    let p = &fit.params;
    let mut out = String::new();

    out.push_str(&format!("Dataset {}:\n", fit.dataset));
    out.push_str(&format!(
        "- Eg={:.3} eV, Eb={:.3} meV, gamma={:.3} eV, ucvsq={:.3}, mhcnp={:.3}, q={:.3}\n",
        p.eg,
        p.eb * 1000.0,
        p.gamma,
        p.ucvsq,
        p.mhcnp,
        p.q
    ));
    out.push_str(&format!("- Deff={:.3} | R^2={:.4} | SSE={:.4e}\n", p.deff(), fit.r_squared, fit.sse));
    out.push_str(&format!("- initial Eg estimate: {:.3} eV\n", fit.initial_eg));

    match mask_range(energy, &fit.fit_mask) {
        Some(r) => out.push_str(&format!(
            "- fit range: {:.3} - {:.3} eV ({} points{})\n",
            r.min,
            r.max,
            r.points,
            if fit.auto_range_applied { ", auto-range" } else { "" }
        )),
        None => out.push_str("- fit range: (empty)\n"),
    }
    match mask_range(energy, &fit.baseline_mask) {
        Some(r) => out.push_str(&format!(
            "- baseline range: {:.3} - {:.3} eV ({} points)\n",
            r.min, r.max, r.points
        )),
        None => out.push_str("- baseline range: (none)\n"),
    }

    if fit.urbach.slope == 0.0 && fit.urbach.intercept == 0.0 {
        out.push_str("- Urbach tail: not found\n");
    } else {
        out.push_str(&format!(
            "- Urbach tail: slope={:.4} /eV, intercept={:.4}",
            fit.urbach.slope, fit.urbach.intercept
        ));
        // Urbach energy is the inverse slope of ln α.
        if fit.urbach.slope > 0.0 {
            out.push_str(&format!(" (Eu={:.1} meV)", 1000.0 / fit.urbach.slope));
        }
        out.push('\n');
    }
    out
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
