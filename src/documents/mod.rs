// Document composition module
// Builds the text of each vector type from a source entity's fields


use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::database::sqlite::models::DocumentType;

/// Vector type used by single-vector documents
pub const CONTENT_VECTOR: &str = "content";
pub const COMPREHENSIVE_VECTOR: &str = "comprehensive";

const FIELD_SEPARATOR: &str = " | ";

/// Personality field groups and the vector type each one feeds
const PERSONALITY_GROUPS: &[(&str, &[&str])] = &[
    (
        "basic_info",
        &[
            "bot_name",
            "nationality",
            "age",
            "gender",
            "height",
            "weight",
            "blood_type",
            "zodiac_sign",
            "birth_date",
            "birth_place",
            "education_level",
            "graduate_school",
            "major",
            "current_address",
            "current_job",
            "work_address",
        ],
    ),
    (
        "personality",
        &["hobbies", "worldview", "life_philosophy", "values"],
    ),
    (
        "preferences",
        &[
            "favorite_music",
            "favorite_movies",
            "favorite_fashion",
            "favorite_hairstyle",
            "favorite_food",
            "favorite_restaurants",
        ],
    ),
    (
        "experiences",
        &[
            "life_timeline",
            "family_members",
            "childhood_experience",
            "childhood_stories",
            "growth_experience",
            "relationship_experience",
            "marital_status",
            "marriage_history",
            "work_experience",
            "business_experience",
            "investment_experience",
        ],
    ),
];

/// Fields that only feed the comprehensive vector
const PERSONALITY_EXTRA_FIELDS: &[&str] = &[
    "daily_routine",
    "places_to_visit",
    "life_dreams",
    "future_thoughts",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("Document data must be a JSON object")]
    NotAnObject,
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),
    #[error("Document has no content to vectorize")]
    Empty,
}

/// One vector's worth of text, ready to embed
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedVector {
    pub vector_type: String,
    pub content: String,
    pub metadata: Value,
}

/// Turn a source entity's fields into its vector contents
#[inline]
pub fn compose(
    document_type: DocumentType,
    data: &Value,
) -> Result<Vec<ComposedVector>, CompositionError> {
    let fields = data.as_object().ok_or(CompositionError::NotAnObject)?;

    match document_type {
        DocumentType::Abbreviation => compose_abbreviation(fields).map(|v| vec![v]),
        DocumentType::Script => compose_script(fields).map(|v| vec![v]),
        DocumentType::Document => compose_document(fields).map(|v| vec![v]),
        DocumentType::Personality => compose_personality(fields),
    }
}

fn compose_abbreviation(fields: &Map<String, Value>) -> Result<ComposedVector, CompositionError> {
    let abbreviation = required(fields, "abbreviation")?;
    let full_form = required(fields, "full_form")?;

    let mut parts = vec![
        format!("Abbreviation: {}", abbreviation),
        format!("Full form: {}", full_form),
    ];
    if let Some(description) = text(fields, "description") {
        parts.push(format!("Description: {}", description));
    }

    Ok(ComposedVector {
        vector_type: CONTENT_VECTOR.to_string(),
        content: parts.join(FIELD_SEPARATOR),
        metadata: json!({
            "abbreviation": abbreviation,
            "full_form": full_form,
            "category": text(fields, "category"),
        }),
    })
}

fn compose_script(fields: &Map<String, Value>) -> Result<ComposedVector, CompositionError> {
    let user_text = required(fields, "text")?;
    let answer = required(fields, "answer")?;
    let scenario = text(fields, "scenario");

    let mut content = format!("User: {}{}Answer: {}", user_text, FIELD_SEPARATOR, answer);
    if let Some(scenario) = &scenario {
        content = format!("Scenario: {}{}{}", scenario, FIELD_SEPARATOR, content);
    }

    Ok(ComposedVector {
        vector_type: CONTENT_VECTOR.to_string(),
        content,
        metadata: json!({ "scenario": scenario }),
    })
}

fn compose_document(fields: &Map<String, Value>) -> Result<ComposedVector, CompositionError> {
    let title = required(fields, "title")?;
    let body = required(fields, "content")?;

    Ok(ComposedVector {
        vector_type: CONTENT_VECTOR.to_string(),
        content: format!("Title: {}{}Content: {}", title, FIELD_SEPARATOR, body),
        metadata: json!({ "title": title }),
    })
}

fn compose_personality(
    fields: &Map<String, Value>,
) -> Result<Vec<ComposedVector>, CompositionError> {
    let metadata = json!({ "bot_name": text(fields, "bot_name") });
    let mut vectors = Vec::new();
    let mut everything = Vec::new();

    for (vector_type, group) in PERSONALITY_GROUPS {
        let parts = labelled(fields, group);
        if parts.is_empty() {
            continue;
        }
        everything.extend(parts.iter().cloned());
        vectors.push(ComposedVector {
            vector_type: (*vector_type).to_string(),
            content: parts.join(FIELD_SEPARATOR),
            metadata: metadata.clone(),
        });
    }

    everything.extend(labelled(fields, PERSONALITY_EXTRA_FIELDS));
    if everything.is_empty() {
        return Err(CompositionError::Empty);
    }

    vectors.push(ComposedVector {
        vector_type: COMPREHENSIVE_VECTOR.to_string(),
        content: everything.join(FIELD_SEPARATOR),
        metadata,
    });

    Ok(vectors)
}

fn labelled(fields: &Map<String, Value>, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter_map(|name| text(fields, name).map(|value| format!("{}: {}", label(name), value)))
        .collect()
}

/// `favorite_music` -> `Favorite music`
fn label(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn required(fields: &Map<String, Value>, name: &'static str) -> Result<String, CompositionError> {
    text(fields, name).ok_or(CompositionError::MissingField(name))
}

/// Field value as trimmed text. Empty strings, nulls and objects count as absent.
fn text(fields: &Map<String, Value>, name: &str) -> Option<String> {
    let value = match fields.get(name)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Object(_) => return None,
    };

    (!value.is_empty()).then_some(value)
}
