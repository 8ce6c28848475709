// src/form_fields.rs
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::aggregation::DayEntry;

// --- Field names of the SGB III absence form (page 1) ---

macro_rules! page_one {
    ($suffix:literal) => {
        concat!("SGBIII-BescheinigungFehlzeitenfuerMonat-Jahr[0].Seite1[0].", $suffix)
    };
}

macro_rules! statement {
    ($suffix:literal) => {
        concat!(
            "SGBIII-BescheinigungFehlzeitenfuerMonat-Jahr[0].Seite1[0].Teilformular-Stellungnahme[0].",
            $suffix
        )
    };
}

pub const FIELD_MONTH_YEAR: &str = page_one!("MonatJahr[0]");
pub const FIELD_NAME: &str = page_one!("NameVorname[0]");
pub const FIELD_STREET_AND_NUMBER: &str = page_one!("StrasseHausnummer[0]");
pub const FIELD_POSTAL_CODE_AND_CITY: &str = page_one!("PLZOrt[0]");
pub const FIELD_CUSTOMER_NUMBER: &str = page_one!("Kunden-Nummer[0]");
pub const FIELD_MEASURE_NUMBER: &str = page_one!("Maßnahmenummer[0]");
pub const FIELD_MEASURE_TITLE: &str = page_one!("Maßnahmebezeichnung[0]");
pub const FIELD_JUSTIFICATION: &str = page_one!("Teilformular-Fehlzeiten[0].Begruendung[0]");
pub const FIELD_DATE_1: &str = page_one!("Datum-1[0]");
pub const FIELD_ATTAINED_DESPITE_ABSENCES: &str = statement!("trotzaufgrundbisherigerFehltage[0]");
pub const FIELD_NOT_ATTAINED_DUE_TO_ABSENCES: &str =
    statement!("trotzaufgrundbisherigerFehltage[1]");
pub const FIELD_DAYS_STILL_ATTAINABLE: &str =
    statement!("TagenseitTeilnahmebeginnvoraussichtlnocherreicht[0]");
pub const FIELD_DAYS_NO_LONGER_ATTAINABLE: &str =
    statement!("TagenseitTeilnahmebeginnvoraussichtlnichtmehrerreicht[0]");
pub const FIELD_REPEAT_OPTION_0: &str = statement!("WiederholungMassnahmeteilBegruendung[0]");
pub const FIELD_REPEAT_FROM_DATE: &str = statement!("WiederholungMassnahmeabDatum[0]");
pub const FIELD_REPEAT_OPTION_1: &str = statement!("WiederholungMassnahmeteilBegruendung[1]");
pub const FIELD_TERMINATION_FROM_DATE: &str = statement!("BeendigungMassnahmeabDatum[0]");

/// Name of the day cell for `day` (1..=31) in the month bar.
pub fn day_field_name(day: u32) -> String {
    format!(
        "{}Tag-{}[0]",
        page_one!("Teilformular-Monatsleiste[0].Tabelle-Monatsleiste[0].Zeile1-Monat[0]."),
        day
    )
}

const CHECKBOX_TRUTHY: [&str; 6] = ["1", "true", "yes", "on", "checked", "x"];

// --- Field model ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Checkbox,
    Dropdown,
    RadioGroup,
    Signature,
    Button,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Text => "text",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Dropdown => "dropdown",
            FieldKind::RadioGroup => "radio_group",
            FieldKind::Signature => "signature",
            FieldKind::Button => "button",
        };
        f.write_str(name)
    }
}

/// Input value for a single field assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    Number(i64),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value)
    }
}

impl FieldValue {
    fn as_text(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Bool(flag) => flag.to_string(),
            FieldValue::Number(number) => number.to_string(),
        }
    }

    fn as_checked(&self) -> bool {
        match self {
            FieldValue::Bool(flag) => *flag,
            other => {
                let normalized = other.as_text().trim().to_lowercase();
                CHECKBOX_TRUTHY.contains(&normalized.as_str())
            }
        }
    }
}

/// Value held by a filled field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldState {
    Text(String),
    Checked(bool),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("Unknown form field: {0}")]
    UnknownField(String),

    #[error("Unsupported field type for \"{field}\": {kind}")]
    UnsupportedFieldType { field: String, kind: FieldKind },
}

// --- Template ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormTemplate {
    pub name: String,
    pub fields: Vec<TemplateField>,
}

/// In-memory interactive form built from a template.
#[derive(Debug, Clone)]
pub struct AcroForm {
    template: String,
    kinds: HashMap<String, FieldKind>,
    values: BTreeMap<String, FieldState>,
}

#[derive(Serialize)]
struct SavedForm<'a> {
    template: &'a str,
    fields: &'a BTreeMap<String, FieldState>,
}

impl AcroForm {
    pub fn from_template(template: &FormTemplate) -> Self {
        let kinds = template
            .fields
            .iter()
            .map(|field| (field.name.clone(), field.kind))
            .collect();
        Self {
            template: template.name.clone(),
            kinds,
            values: BTreeMap::new(),
        }
    }

    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.kinds.get(name).copied()
    }

    #[cfg(test)]
    pub fn value(&self, name: &str) -> Option<&FieldState> {
        self.values.get(name)
    }

    pub fn filled_count(&self) -> usize {
        self.values.len()
    }

    pub fn assign(&mut self, name: &str, value: FieldValue) -> Result<(), FormError> {
        let kind = self
            .kind_of(name)
            .ok_or_else(|| FormError::UnknownField(name.to_string()))?;
        let state = match kind {
            FieldKind::Text => FieldState::Text(value.as_text()),
            FieldKind::Checkbox => FieldState::Checked(value.as_checked()),
            other => {
                return Err(FormError::UnsupportedFieldType {
                    field: name.to_string(),
                    kind: other,
                })
            }
        };
        self.values.insert(name.to_string(), state);
        Ok(())
    }

    /// Like [`AcroForm::assign`], but `None` leaves the field untouched.
    pub fn assign_opt<V: Into<FieldValue>>(
        &mut self,
        name: &str,
        value: Option<V>,
    ) -> Result<(), FormError> {
        match value {
            Some(value) => self.assign(name, value.into()),
            None => Ok(()),
        }
    }

    // Pretty JSON `{ template, fields: { name: value } }`
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(&SavedForm {
            template: &self.template,
            fields: &self.values,
        })
    }
}

// --- Fill data ---

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormFillData {
    pub month_year: Option<String>,
    pub name: Option<String>,
    pub street_and_number: Option<String>,
    pub postal_code_and_city: Option<String>,
    pub customer_number: Option<String>,
    pub measure_number: Option<String>,
    pub measure_title: Option<String>,
    pub justification: Option<String>,
    pub date_1: Option<String>,
    pub days: Vec<DayEntry>,
    pub attained_despite_absences: Option<bool>,
    pub not_attained_due_to_absences: Option<bool>,
    pub days_since_start_still_attainable: Option<i64>,
    pub days_since_start_no_longer_attainable: Option<i64>,
    pub repeat_option_0: Option<bool>,
    pub repeat_option_1: Option<bool>,
    pub repeat_from_date: Option<String>,
    pub termination_from_date: Option<String>,
}

/// Writes every present value of `data` into `form`, in a fixed order.
///
/// Stops at the first failing assignment. Fields assigned before the failure
/// keep their values, so callers must not persist a form after an error.
pub fn apply_fill_data(form: &mut AcroForm, data: &FormFillData) -> Result<(), FormError> {
    form.assign_opt(FIELD_MONTH_YEAR, data.month_year.clone())?;
    form.assign_opt(FIELD_NAME, data.name.clone())?;
    form.assign_opt(FIELD_STREET_AND_NUMBER, data.street_and_number.clone())?;
    form.assign_opt(FIELD_POSTAL_CODE_AND_CITY, data.postal_code_and_city.clone())?;
    form.assign_opt(FIELD_CUSTOMER_NUMBER, data.customer_number.clone())?;
    form.assign_opt(FIELD_MEASURE_NUMBER, data.measure_number.clone())?;
    form.assign_opt(FIELD_MEASURE_TITLE, data.measure_title.clone())?;
    form.assign_opt(FIELD_JUSTIFICATION, data.justification.clone())?;

    for entry in &data.days {
        if !(1..=31).contains(&entry.day) {
            debug!("Skipping day entry outside 1..31: {}", entry.day);
            continue;
        }
        form.assign(&day_field_name(entry.day), FieldValue::Text(entry.value.to_string()))?;
    }

    form.assign_opt(FIELD_ATTAINED_DESPITE_ABSENCES, data.attained_despite_absences)?;
    form.assign_opt(FIELD_NOT_ATTAINED_DUE_TO_ABSENCES, data.not_attained_due_to_absences)?;
    form.assign_opt(FIELD_DAYS_STILL_ATTAINABLE, data.days_since_start_still_attainable)?;
    form.assign_opt(
        FIELD_DAYS_NO_LONGER_ATTAINABLE,
        data.days_since_start_no_longer_attainable,
    )?;
    form.assign_opt(FIELD_REPEAT_OPTION_0, data.repeat_option_0)?;
    form.assign_opt(FIELD_REPEAT_FROM_DATE, data.repeat_from_date.clone())?;
    form.assign_opt(FIELD_REPEAT_OPTION_1, data.repeat_option_1)?;
    form.assign_opt(FIELD_TERMINATION_FROM_DATE, data.termination_from_date.clone())?;
    form.assign_opt(FIELD_DATE_1, data.date_1.clone())?;
    Ok(())
}
