//! Message composition.
//!
//! Event lines are rendered identically everywhere; only the header and
//! footer framing depend on the [`RenderProfile`].

use chrono::NaiveDate;

use crate::surgery::Surgery;

const MISSING: &str = "-";

/// Framing variant for a ward message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderProfile {
    /// Daily automated dispatch.
    Scheduled,
    /// Operator-triggered correction.
    Resend,
}

fn field(v: &Option<String>) -> &str {
    match v.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => MISSING,
    }
}

/// "today", "tomorrow", "in N days".
pub fn lead_label(lead_days: i64) -> String {
    match lead_days {
        0 => "today".to_string(),
        1 => "tomorrow".to_string(),
        n => format!("in {} days", n),
    }
}

/// One numbered line for a surgery.
pub fn render_line(index: usize, s: &Surgery) -> String {
    let time = s
        .surgery_time
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| MISSING.to_string());
    let name = if s.patient_name.trim().is_empty() {
        MISSING
    } else {
        s.patient_name.trim()
    };

    format!(
        "{}. {} (ID: {}) | Surgeon: {} | Anesth: {} | {} | {} | Tel: {} / {} | OR: {} | Dx: {}",
        index,
        name,
        field(&s.patient_id),
        field(&s.surgeon),
        field(&s.anesthetist),
        time,
        field(&s.procedure_type),
        field(&s.phone_primary),
        field(&s.phone_secondary),
        field(&s.operating_room),
        field(&s.diagnosis),
    )
}

/// Full message body for one ward.
pub fn compose(
    profile: RenderProfile,
    destination_label: &str,
    lead_days: i64,
    target_date: NaiveDate,
    surgeries: &[Surgery],
) -> String {
    let date = target_date.format("%d/%m/%Y");
    let mut out = match profile {
        RenderProfile::Scheduled => format!(
            "[OR SCHEDULE] {}\nSurgeries {} ({}):\n",
            destination_label,
            lead_label(lead_days),
            date
        ),
        RenderProfile::Resend => format!(
            "[OR SCHEDULE - UPDATED] {}\nCurrent surgery list for {}:\n",
            destination_label, date
        ),
    };

    for (i, s) in surgeries.iter().enumerate() {
        out.push_str(&render_line(i + 1, s));
        out.push('\n');
    }

    match profile {
        RenderProfile::Scheduled => {
            out.push_str(&format!("Total: {} surgeries", surgeries.len()));
        }
        RenderProfile::Resend => {
            out.push_str(&format!(
                "Total: {} surgeries. This list replaces the earlier notification.",
                surgeries.len()
            ));
        }
    }
    out
}
