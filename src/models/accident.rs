use std::{fmt, str::FromStr, sync::LazyLock};

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern must compile"));
static TIME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}:\d{2}$").expect("time pattern must compile"));

const HIGH_SYNONYMS: [&str; 8] = [
    "alto", "alta", "high", "grave", "critico", "critica", "severo", "severa",
];
const MEDIUM_SYNONYMS: [&str; 5] = ["medio", "media", "medium", "moderado", "moderada"];
const LOW_SYNONYMS: [&str; 5] = ["bajo", "baja", "low", "leve", "menor"];

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccidentId {
    Int(i64),
    Text(String),
}

impl AccidentId {
    /// Parses an identifier coming from a URL path segment. Numeric segments
    /// become [`AccidentId::Int`], everything else is kept as text.
    pub fn from_path(raw: &str) -> Self {
        raw.parse::<i64>()
            .map_or_else(|_| Self::Text(raw.to_string()), Self::Int)
    }
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Text(text) if text.trim().is_empty())
    }
    /// Compares two identifiers by their textual form, so `7` and `"7"` match.
    pub fn same_as(&self, other: &AccidentId) -> bool {
        self.to_string() == other.to_string()
    }
}

impl fmt::Display for AccidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Creation time as written by whichever store persisted the record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreatedAt {
    Iso(String),
    Millis(i64),
    Timestamp { seconds: i64, nanoseconds: i64 },
    Other(Value),
}

impl From<DateTime<Utc>> for CreatedAt {
    fn from(time: DateTime<Utc>) -> Self {
        Self::Iso(time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

/// `[longitude, latitude]`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates(pub f64, pub f64);

impl Coordinates {
    pub fn longitude(&self) -> f64 {
        self.0
    }
    pub fn latitude(&self) -> f64 {
        self.1
    }
    pub fn in_bounds(&self) -> bool {
        (-180.0..=180.0).contains(&self.0) && (-90.0..=90.0).contains(&self.1)
    }

    /// Reads a two-element array of numbers or numeric strings.
    fn from_value(value: &Value) -> Option<Self> {
        match value.as_array()?.as_slice() {
            [longitude, latitude] => Some(Self(parse_float(longitude)?, parse_float(latitude)?)),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Maps a free-form risk label onto a level. Exact `low|medium|high`
    /// wins; otherwise Spanish and English synonyms are matched as
    /// substrings, most severe first.
    pub fn classify(raw: &str) -> Option<Self> {
        let label = fold_accents(raw.trim());

        if let Ok(level) = label.parse() {
            return Some(level);
        }
        if HIGH_SYNONYMS.iter().any(|s| label.contains(s)) {
            Some(Self::High)
        } else if MEDIUM_SYNONYMS.iter().any(|s| label.contains(s)) {
            Some(Self::Medium)
        } else if LOW_SYNONYMS.iter().any(|s| label.contains(s)) {
            Some(Self::Low)
        } else {
            None
        }
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("UNKNOWN_RISK_LEVEL: {s}")),
        }
    }
}

fn fold_accents(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            other => other,
        })
        .collect()
}

/// One incident report. Image references are read from `imageUrl`, `image`
/// or `imagenes` and always written back as `imageUrl`. Fields this type does
/// not know about, and known fields holding a value of an unexpected shape
/// (including explicit `null`), are carried in `extra` untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct Accident {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<AccidentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tipo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descripcion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fecha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hora: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordenadas: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nivel_riesgo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub afectados: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brigada_asignada: Option<String>,
    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<CreatedAt>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<Map<String, Value>> for Accident {
    fn from(mut fields: Map<String, Value>) -> Self {
        // Assigned on create, so a null here must not shadow the new value.
        for key in ["id", "createdAt"] {
            if fields.get(key).is_some_and(Value::is_null) {
                fields.remove(key);
            }
        }

        let images: Vec<Value> = ["imageUrl", "image", "imagenes"]
            .into_iter()
            .filter_map(|key| fields.remove(key))
            .collect();
        let image_url = images.into_iter().find_map(first_image_reference);

        Self {
            id: take(&mut fields, "id", parse_id),
            nombre: take(&mut fields, "nombre", parse_text),
            municipio: take(&mut fields, "municipio", parse_text),
            tipo: take(&mut fields, "tipo", parse_text),
            descripcion: take(&mut fields, "descripcion", parse_text),
            fecha: take(&mut fields, "fecha", parse_text),
            hora: take(&mut fields, "hora", parse_text),
            coordenadas: take(&mut fields, "coordenadas", Coordinates::from_value),
            nivel_riesgo: take(&mut fields, "nivel_riesgo", parse_text),
            afectados: take(&mut fields, "afectados", parse_count),
            brigada_asignada: take(&mut fields, "brigada_asignada", parse_text),
            image_url,
            created_at: take(&mut fields, "createdAt", |value| {
                serde_json::from_value(value.clone()).ok()
            }),
            extra: fields,
        }
    }
}

/// Removes `key` and parses it. A value `parse` rejects goes back into
/// `fields` as is.
fn take<T>(
    fields: &mut Map<String, Value>,
    key: &str,
    parse: impl FnOnce(&Value) -> Option<T>,
) -> Option<T> {
    let value = fields.remove(key)?;
    let parsed = parse(&value);
    if parsed.is_none() {
        fields.insert(key.to_string(), value);
    }
    parsed
}

fn parse_id(value: &Value) -> Option<AccidentId> {
    match value {
        Value::Number(number) => number.as_i64().map(AccidentId::Int),
        Value::String(text) => Some(AccidentId::Text(text.clone())),
        _ => None,
    }
}

fn parse_text(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// Whole numbers, also when sent as numeric strings.
fn parse_count(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
}

fn parse_float(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
}

fn first_image_reference(value: Value) -> Option<String> {
    match value {
        Value::String(reference) if !reference.trim().is_empty() => Some(reference),
        Value::Array(references) => references.into_iter().find_map(first_image_reference),
        _ => None,
    }
}

impl Accident {
    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.nivel_riesgo.as_deref().and_then(RiskLevel::classify)
    }

    /// Form-layer checks. Returns one message per problem; an empty list
    /// means the candidate is acceptable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let missing: Vec<&str> = [
            ("nombre", &self.nombre),
            ("tipo", &self.tipo),
            ("descripcion", &self.descripcion),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            problems.push(format!("Missing required fields: {}", missing.join(", ")));
        }

        if let Some(fecha) = &self.fecha {
            if !DATE_PATTERN.is_match(fecha) {
                problems.push("fecha must use the YYYY-MM-DD format".to_string());
            }
        }
        if let Some(hora) = &self.hora {
            if !TIME_PATTERN.is_match(hora) {
                problems.push("hora must use the HH:MM format".to_string());
            }
        }
        if let Some(coordenadas) = &self.coordenadas {
            if !coordenadas.in_bounds() {
                problems.push(format!(
                    "coordenadas out of range: longitude {} latitude {}",
                    coordenadas.longitude(),
                    coordenadas.latitude()
                ));
            }
        }
        if self.extra.get("coordenadas").is_some_and(|value| !value.is_null()) {
            problems.push("coordenadas must be a [longitude, latitude] pair".to_string());
        }
        if matches!(self.afectados, Some(count) if count < 0) {
            problems.push("afectados must not be negative".to_string());
        }
        if self.extra.get("afectados").is_some_and(|value| !value.is_null()) {
            problems.push("afectados must be a whole number".to_string());
        }

        problems
    }
}
