//! Percentage badges in the shields.io endpoint format.
use crate::errors::ProgressError;
use crate::types::{Category, Entry, Version};
use serde::{Deserialize, Serialize};

const SCHEMA_VERSION: u8 = 1;
const COLOR_COMPLETE: &str = "success";
const COLOR_INCOMPLETE: &str = "informational";

/// Query parameters accepted in shield mode.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ShieldParams {
    pub measure: Option<String>,
    pub total: Option<String>,
    pub label: Option<String>,
    pub color: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shield {
    pub schema_version: u8,
    pub label: String,
    pub message: String,
    pub color: String,
}

/// Builds the badge for `measure / total` of the latest entry of a category.
///
/// Without an explicit `total`, the measure named `<measure>/total` is used.
pub fn compute_shield(
    version: &Version,
    category: &Category,
    latest: &Entry,
    params: &ShieldParams,
) -> Result<Shield, ProgressError> {
    let measure = params
        .measure
        .as_deref()
        .ok_or_else(|| ProgressError::invalid_data("No measure specified"))?;
    let numerator = lookup(latest, measure)?;

    let label = match &params.label {
        Some(label) => label.clone(),
        None => format!("{} {} {}", version.name, category.name, titlecase(measure)),
    };

    let total = match &params.total {
        Some(total) => total.clone(),
        None => {
            let inferred = format!("{measure}/total");
            if !latest.measures.contains_key(&inferred) {
                return Err(ProgressError::invalid_data("No total specified"));
            }
            inferred
        }
    };
    let denominator = lookup(latest, &total)?;
    if denominator == 0 {
        return Err(ProgressError::invalid_data(format!(
            "Measure '{total}' is zero"
        )));
    }

    let fraction = numerator as f64 / denominator as f64;
    let color = match &params.color {
        Some(color) => color.clone(),
        None if fraction < 1.0 => COLOR_INCOMPLETE.to_string(),
        None => COLOR_COMPLETE.to_string(),
    };

    Ok(Shield {
        schema_version: SCHEMA_VERSION,
        label,
        message: format!("{:.2}%", fraction * 100.0),
        color,
    })
}

fn lookup(entry: &Entry, measure: &str) -> Result<i64, ProgressError> {
    entry
        .measures
        .get(measure)
        .copied()
        .ok_or_else(|| ProgressError::invalid_data(format!("Measure '{measure}' not found")))
}

/// Capitalizes the first letter of every run of letters and lowercases the
/// rest. A letter directly after a digit or after `x'` stays lowercase, so
/// `"2nd"` and `"don't"` read naturally.
pub fn titlecase(value: &str) -> String {
    let mut out: Vec<char> = Vec::with_capacity(value.len());
    let mut in_word = false;

    for c in value.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }

    for i in 1..out.len() {
        if !out[i].is_uppercase() {
            continue;
        }
        let after_digit = out[i - 1].is_ascii_digit();
        let after_apostrophe = i >= 2 && out[i - 1] == '\'' && out[i - 2].is_lowercase();
        if after_digit || after_apostrophe {
            let lower: Vec<char> = out[i].to_lowercase().collect();
            if lower.len() == 1 {
                out[i] = lower[0];
            }
        }
    }

    out.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Measures;

    fn version() -> Version {
        Version {
            id: 1,
            project_id: 1,
            slug: "us".into(),
            name: "US".into(),
        }
    }

    fn category() -> Category {
        Category {
            id: 1,
            version_id: 1,
            slug: "default".into(),
            name: "Default".into(),
        }
    }

    fn entry(measures: &[(&str, i64)]) -> Entry {
        Entry {
            timestamp: 1615435438,
            git_hash: "e788bfecbfb10afd4182332db99bb562ea75b1de".into(),
            measures: measures
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect::<Measures>(),
        }
    }

    fn params(measure: &str, total: Option<&str>) -> ShieldParams {
        ShieldParams {
            measure: Some(measure.into()),
            total: total.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn quarter_done() {
        let latest = entry(&[("matching", 50), ("total", 200)]);
        let shield =
            compute_shield(&version(), &category(), &latest, &params("matching", Some("total")))
                .unwrap();

        assert_eq!(
            shield,
            Shield {
                schema_version: 1,
                label: "US Default Matching".into(),
                message: "25.00%".into(),
                color: "informational".into(),
            }
        );
        assert_eq!(
            serde_json::to_value(&shield).unwrap(),
            serde_json::json!({
                "schemaVersion": 1,
                "label": "US Default Matching",
                "message": "25.00%",
                "color": "informational"
            })
        );
    }

    #[test]
    fn inferred_total_and_complete_color() {
        let latest = entry(&[("code", 300), ("code/total", 300)]);
        let shield = compute_shield(&version(), &category(), &latest, &params("code", None)).unwrap();

        assert_eq!(shield.message, "100.00%");
        assert_eq!(shield.color, "success");
    }

    #[test]
    fn overrides() {
        let latest = entry(&[("code", 4567), ("code/total", 10000)]);
        let params = ShieldParams {
            measure: Some("code".into()),
            total: None,
            label: Some("Code".into()),
            color: Some("blue".into()),
        };
        let shield = compute_shield(&version(), &category(), &latest, &params).unwrap();

        assert_eq!(shield.label, "Code");
        assert_eq!(shield.color, "blue");
        assert_eq!(shield.message, "45.67%");
    }

    #[test]
    fn invalid_requests() {
        let latest = entry(&[("code", 1), ("zero", 0)]);
        let message = |params: ShieldParams| {
            compute_shield(&version(), &category(), &latest, &params)
                .unwrap_err()
                .to_string()
        };

        assert_eq!(message(ShieldParams::default()), "No measure specified");
        assert_eq!(message(params("asm", None)), "Measure 'asm' not found");
        assert_eq!(message(params("code", None)), "No total specified");
        assert_eq!(
            message(params("code", Some("data"))),
            "Measure 'data' not found"
        );
        assert_eq!(message(params("code", Some("zero"))), "Measure 'zero' is zero");
    }

    #[test]
    fn titlecasing() {
        assert_eq!(titlecase("code_matching"), "Code_Matching");
        assert_eq!(titlecase("ASM"), "Asm");
        assert_eq!(titlecase("2nd pass"), "2nd Pass");
        assert_eq!(titlecase("don't"), "Don't");
        assert_eq!(titlecase(""), "");
    }
}
