//! Shape validation of agent output, applied before an artifact persists.
//!
//! Validation is structural, not editorial: it catches empty or internally
//! inconsistent payloads, never judges the content. Hard mode fails the
//! unit; soft mode keeps the artifact and reports the problems.

use std::collections::BTreeSet;

use hookline_types::{
    HooklineError, QualityGateMode, QualityGatePolicy, Result, StagePayload,
};

/// Structural problems with a payload, empty when it is well-formed.
pub fn validate_payload(payload: &StagePayload) -> Vec<String> {
    let mut problems = Vec::new();
    match payload {
        StagePayload::Foundation {
            positioning,
            audience,
            voice,
            ..
        } => {
            for (field, value) in [
                ("positioning", positioning),
                ("audience", audience),
                ("voice", voice),
            ] {
                if value.trim().is_empty() {
                    problems.push(format!("foundation {field} is empty"));
                }
            }
        }
        StagePayload::Research { findings, .. } => {
            if findings.is_empty() {
                problems.push("research produced no findings".into());
            }
        }
        StagePayload::BriefPlan { units } => {
            if units.is_empty() {
                problems.push("brief plan has no units".into());
            }
            let mut seen = BTreeSet::new();
            for unit in units {
                if !seen.insert(unit.key.clone()) {
                    problems.push(format!("duplicate unit key {}", unit.key));
                }
                if unit.angle.trim().is_empty() {
                    problems.push(format!("unit {} has an empty angle", unit.key));
                }
            }
        }
        StagePayload::Script { hook_line, beats } => {
            if hook_line.trim().is_empty() {
                problems.push("script hook line is empty".into());
            }
            if beats.is_empty() {
                problems.push("script has no beats".into());
            }
        }
        StagePayload::HookSet { options } => {
            if options.is_empty() {
                problems.push("hook set has no options".into());
            }
            let mut seen = BTreeSet::new();
            for option in options {
                if !seen.insert(option.id) {
                    problems.push(format!("duplicate hook option id {}", option.id));
                }
                if option.text.trim().is_empty() {
                    problems.push(format!("hook option {} is empty", option.id));
                }
            }
        }
        // A selection is a human decision; its referent is checked where it
        // is recorded, against the live hook set.
        StagePayload::HookSelection { .. } => {}
        StagePayload::ScenePlan { scenes } => {
            if scenes.is_empty() {
                problems.push("scene plan has no scenes".into());
            }
            for (i, scene) in scenes.iter().enumerate() {
                if scene.voiceover.trim().is_empty() {
                    problems.push(format!("scene {i} has no voiceover"));
                }
            }
        }
    }
    problems
}

/// Apply the branch's quality policy to a freshly generated payload. Returns
/// the problem list for soft reporting, or fails the unit in hard mode.
pub fn enforce_policy(policy: &QualityGatePolicy, payload: &StagePayload) -> Result<Vec<String>> {
    let problems = validate_payload(payload);
    if !problems.is_empty() && policy.mode == QualityGateMode::Hard {
        return Err(HooklineError::QualityGate {
            stage: payload.stage(),
            problems,
        });
    }
    Ok(problems)
}
