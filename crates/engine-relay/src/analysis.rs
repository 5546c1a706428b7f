//! Request defaults and reply shaping for the analyze/eval routes.

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisDefaults {
    pub rules: String,
    pub komi: f64,
    pub max_visits: u32,
}

impl Default for AnalysisDefaults {
    fn default() -> Self {
        Self {
            rules: "japanese".to_string(),
            komi: 6.5,
            max_visits: 128,
        }
    }
}

impl AnalysisDefaults {
    /// Fill `rules` when missing or empty and `komi` when not a number.
    pub fn apply_analyze(&self, body: &mut Map<String, Value>) {
        let has_rules = body
            .get("rules")
            .map(|r| !r.is_null() && r.as_str() != Some(""))
            .unwrap_or(false);
        if !has_rules {
            body.insert("rules".into(), Value::from(self.rules.clone()));
        }
        if !body.get("komi").map(Value::is_number).unwrap_or(false) {
            body.insert("komi".into(), Value::from(self.komi));
        }
    }

    /// Analyze defaults plus a visit cap. Ownership maps are always switched off.
    pub fn apply_eval(&self, body: &mut Map<String, Value>) {
        self.apply_analyze(body);
        if !body.get("maxVisits").map(Value::is_number).unwrap_or(false) {
            body.insert("maxVisits".into(), Value::from(self.max_visits));
        }
        body.insert("includeOwnership".into(), Value::Bool(false));
    }
}

/// Move with the most visits. Entries without `visits` count as zero; ties keep the earlier entry.
pub fn best_move(reply: &Value) -> Option<String> {
    let infos = reply.get("moveInfos")?.as_array()?;
    let mut best: Option<(&Value, u64)> = None;
    for info in infos {
        let visits = info.get("visits").and_then(Value::as_u64).unwrap_or(0);
        match best {
            Some((_, top)) if top >= visits => {}
            _ => best = Some((info, visits)),
        }
    }
    best.and_then(|(info, _)| info.get("move")?.as_str().map(str::to_string))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalSummary {
    pub winrate_black: Option<f64>,
    pub score_lead: Option<f64>,
    pub pv: Vec<String>,
}

impl EvalSummary {
    /// Root winrate and score lead, plus the principal variation of the first move entry.
    pub fn from_reply(reply: &Value) -> Self {
        let root = reply.get("rootInfo");
        let pv = reply
            .get("moveInfos")
            .and_then(Value::as_array)
            .and_then(|infos| infos.first())
            .and_then(|top| top.get("pv"))
            .and_then(Value::as_array)
            .map(|moves| {
                moves
                    .iter()
                    .filter_map(|m| m.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            winrate_black: root.and_then(|r| r.get("winrate")).and_then(Value::as_f64),
            score_lead: root.and_then(|r| r.get("scoreLead")).and_then(Value::as_f64),
            pv,
        }
    }
}
