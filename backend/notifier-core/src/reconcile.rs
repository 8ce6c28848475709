// src/reconcile.rs
use chrono::NaiveDate;
use serde::Serialize;

use crate::aggregation::{day_assignment, day_codes, total_overlap_days};
use crate::config::FormDefaults;
use crate::form_fields::FormFillData;
use crate::period::Period;
use crate::zoho_client::{Absence, AbsenceNotification, Contact, ContactRole, Deal};

/// Absences and prior notification collected for one deal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealAbsenceSummary {
    pub deal: Deal,
    /// `None` when no absence references the deal.
    pub absences: Option<Vec<Absence>>,
    pub prior_notification: Option<AbsenceNotification>,
}

impl DealAbsenceSummary {
    pub fn has_absences(&self) -> bool {
        self.absences.as_ref().is_some_and(|absences| !absences.is_empty())
    }

    pub fn absences(&self) -> &[Absence] {
        self.absences.as_deref().unwrap_or(&[])
    }
}

pub fn summarize(
    deals: &[Deal],
    absences: &[Absence],
    prior_notifications: &[AbsenceNotification],
) -> Vec<DealAbsenceSummary> {
    deals
        .iter()
        .map(|deal| {
            let deal_absences: Vec<Absence> = absences
                .iter()
                .filter(|absence| absence.deal_id() == Some(deal.id.as_str()))
                .cloned()
                .collect();
            let prior_notification = prior_notifications
                .iter()
                .find(|notification| notification.deal_id() == Some(deal.id.as_str()))
                .cloned();
            DealAbsenceSummary {
                deal: deal.clone(),
                absences: (!deal_absences.is_empty()).then_some(deal_absences),
                prior_notification,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationDecision {
    NoAbsencesFound,
    MissingResponsibleContact,
    Proceed { responsible_contact_id: String },
}

pub fn should_generate(
    summary: &DealAbsenceSummary,
    responsible_contact_id: Option<&str>,
) -> GenerationDecision {
    if !summary.has_absences() {
        return GenerationDecision::NoAbsencesFound;
    }
    match responsible_contact_id {
        Some(id) => GenerationDecision::Proceed {
            responsible_contact_id: id.to_string(),
        },
        None => GenerationDecision::MissingResponsibleContact,
    }
}

/// The deal role record acting as decision maker, if any.
pub fn responsible_contact<'a>(roles: &'a [ContactRole], role_name: &str) -> Option<&'a ContactRole> {
    roles.iter().find(|role| {
        role.contact_role
            .as_ref()
            .and_then(|lookup| lookup.name.as_deref())
            == Some(role_name)
    })
}

pub fn running_total(period_absence_days: i64, prior: Option<&AbsenceNotification>) -> i64 {
    period_absence_days + prior.and_then(|n| n.total_absence_days).unwrap_or(0)
}

/// Counts written back to the notification for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AbsenceCounts {
    pub period_days: i64,
    pub total_days: i64,
}

pub fn absence_counts(summary: &DealAbsenceSummary, period: &Period) -> AbsenceCounts {
    let period_days = total_overlap_days(summary.absences(), period);
    AbsenceCounts {
        period_days,
        total_days: running_total(period_days, summary.prior_notification.as_ref()),
    }
}

pub fn notification_name(deal_id: &str) -> String {
    format!("Absence Notification for {}", deal_id)
}

pub fn document_name(deal_id: &str, period: &Period) -> String {
    format!("absence_notification_{}_{}", deal_id, period.start.format("%Y-%m"))
}

pub struct FillInputs<'a> {
    pub period: &'a Period,
    pub deal: &'a Deal,
    pub contact: &'a Contact,
    pub absences: &'a [Absence],
    pub running_total: i64,
    pub generated_on: NaiveDate,
    pub defaults: &'a FormDefaults,
}

pub fn build_fill_data(inputs: &FillInputs<'_>) -> FormFillData {
    let contact = inputs.contact;
    let defaults = inputs.defaults;
    let slots = day_assignment(inputs.absences, inputs.period.start);

    FormFillData {
        month_year: Some(inputs.period.month_year()),
        name: inputs
            .deal
            .contact_name
            .as_ref()
            .and_then(|lookup| lookup.name.clone())
            .or_else(|| contact.full_name.clone()),
        street_and_number: contact.mailing_street.clone(),
        postal_code_and_city: Some(format!(
            "{}, {}",
            contact.mailing_zip.as_deref().unwrap_or_default(),
            contact.mailing_city.as_deref().unwrap_or_default()
        )),
        customer_number: contact.account_number_text(),
        measure_number: inputs.deal.measure_number.clone(),
        measure_title: defaults.measure_title.clone(),
        justification: defaults.justification.clone(),
        date_1: Some(inputs.generated_on.format("%d.%m.%Y").to_string()),
        days: day_codes(&slots),
        attained_despite_absences: defaults.attained_despite_absences,
        not_attained_due_to_absences: defaults.not_attained_due_to_absences,
        days_since_start_still_attainable: Some(inputs.running_total),
        days_since_start_no_longer_attainable: defaults.days_since_start_no_longer_attainable,
        repeat_option_0: defaults.repeat_option_0,
        repeat_option_1: defaults.repeat_option_1,
        repeat_from_date: defaults.repeat_from_date.clone(),
        termination_from_date: defaults.termination_from_date.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zoho_client::{NotificationStatus, RecordRef};
    use chrono_tz::Europe::Berlin;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn deal(id: &str) -> Deal {
        Deal {
            id: id.to_string(),
            contact_name: Some(RecordRef {
                id: format!("contact-{}", id),
                name: Some("Test".to_string()),
            }),
            measure_number: Some("M-1".to_string()),
        }
    }

    fn absence(id: &str, deal_id: &str, start: &str, end: &str, reason: &str) -> Absence {
        Absence {
            id: id.to_string(),
            reason: Some(reason.to_string()),
            start_date: Some(d(start)),
            end_date: Some(d(end)),
            deal: Some(RecordRef::id(deal_id)),
        }
    }

    fn notification(id: &str, deal_id: &str, total: Option<i64>) -> AbsenceNotification {
        AbsenceNotification {
            id: id.to_string(),
            deal: Some(RecordRef::id(deal_id)),
            start_date: Some(d("2024-05-01")),
            end_date: Some(d("2024-05-31")),
            period_absence_days: None,
            total_absence_days: total,
            status: Some(NotificationStatus::LinkedWithAbsences),
        }
    }

    fn june() -> Period {
        Period::for_month(2024, 6, Berlin).unwrap()
    }

    #[test]
    fn summarize_groups_by_deal() {
        let deals = vec![deal("1"), deal("2"), deal("3")];
        let absences = vec![
            absence("a", "1", "2024-06-03", "2024-06-04", "K"),
            absence("b", "2", "2024-06-05", "2024-06-05", "U"),
            absence("c", "1", "2024-06-10", "2024-06-10", "K"),
        ];
        let prior = vec![
            notification("n2", "2", Some(4)),
            notification("n2-old", "2", Some(1)),
        ];

        let summaries = summarize(&deals, &absences, &prior);

        assert_eq!(summaries.len(), 3);
        let first: Vec<&str> = summaries[0].absences().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(first, vec!["a", "c"]);
        assert!(summaries[0].prior_notification.is_none());
        assert_eq!(
            summaries[1].prior_notification.as_ref().map(|n| n.id.as_str()),
            Some("n2")
        );
        assert_eq!(summaries[2].absences, None);
        assert!(!summaries[2].has_absences());
    }

    #[test]
    fn decision_policy() {
        let with_absences = DealAbsenceSummary {
            deal: deal("1"),
            absences: Some(vec![absence("a", "1", "2024-06-03", "2024-06-04", "K")]),
            prior_notification: None,
        };
        let empty = DealAbsenceSummary {
            absences: Some(Vec::new()),
            ..with_absences.clone()
        };
        let none = DealAbsenceSummary {
            absences: None,
            ..with_absences.clone()
        };

        assert_eq!(should_generate(&empty, Some("r")), GenerationDecision::NoAbsencesFound);
        assert_eq!(should_generate(&none, Some("r")), GenerationDecision::NoAbsencesFound);
        assert_eq!(
            should_generate(&with_absences, None),
            GenerationDecision::MissingResponsibleContact
        );
        assert_eq!(
            should_generate(&with_absences, Some("r")),
            GenerationDecision::Proceed {
                responsible_contact_id: "r".to_string()
            }
        );
    }

    #[test]
    fn responsible_contact_matches_role_name() {
        let roles: Vec<ContactRole> = serde_json::from_value(json!([
            { "id": "r1", "Contact_Role": { "id": "x", "name": "Employee" } },
            { "id": "r2", "Contact_Role": null },
            { "id": "r3", "Contact_Role": { "id": "y", "name": "Decision Maker" }, "Email": "ba@example.com" }
        ]))
        .unwrap();

        let found = responsible_contact(&roles, "Decision Maker");

        assert_eq!(found.map(|role| role.id.as_str()), Some("r3"));
        assert!(responsible_contact(&roles, "Evaluator").is_none());
    }

    #[test]
    fn running_total_adds_prior_total() {
        assert_eq!(running_total(6, None), 6);
        assert_eq!(running_total(6, Some(&notification("n", "1", Some(4)))), 10);
        assert_eq!(running_total(6, Some(&notification("n", "1", None))), 6);
    }

    #[test]
    fn counts_use_period_overlap() {
        let summary = DealAbsenceSummary {
            deal: deal("1"),
            absences: Some(vec![
                absence("a", "1", "2024-05-30", "2024-06-02", "K"),
                absence("b", "1", "2024-06-10", "2024-06-12", "K"),
            ]),
            prior_notification: Some(notification("n", "1", Some(5))),
        };

        let counts = absence_counts(&summary, &june());

        assert_eq!(counts, AbsenceCounts { period_days: 5, total_days: 10 });
    }

    #[test]
    fn fill_data_from_deal_and_contact() {
        let contact: Contact = serde_json::from_value(json!({
            "Full_Name": "Test Person",
            "Mailing_Street": "Hauptstr. 1",
            "Mailing_Zip": "12345",
            "Mailing_City": "Town",
            "Account_Nummer": "ACC1"
        }))
        .unwrap();
        let absences = vec![absence("a", "1", "2024-06-03", "2024-06-04", "Krank")];
        let defaults = FormDefaults {
            measure_title: Some("Umschulung".to_string()),
            attained_despite_absences: Some(true),
            days_since_start_no_longer_attainable: Some(22),
            ..Default::default()
        };
        let period = june();

        let data = build_fill_data(&FillInputs {
            period: &period,
            deal: &deal("1"),
            contact: &contact,
            absences: &absences,
            running_total: 10,
            generated_on: d("2024-07-01"),
            defaults: &defaults,
        });

        assert_eq!(data.month_year.as_deref(), Some("06/2024"));
        assert_eq!(data.name.as_deref(), Some("Test"));
        assert_eq!(data.street_and_number.as_deref(), Some("Hauptstr. 1"));
        assert_eq!(data.postal_code_and_city.as_deref(), Some("12345, Town"));
        assert_eq!(data.customer_number.as_deref(), Some("ACC1"));
        assert_eq!(data.measure_number.as_deref(), Some("M-1"));
        assert_eq!(data.measure_title.as_deref(), Some("Umschulung"));
        assert_eq!(data.date_1.as_deref(), Some("01.07.2024"));
        assert_eq!(data.days_since_start_still_attainable, Some(10));
        assert_eq!(data.days_since_start_no_longer_attainable, Some(22));
        assert_eq!(data.attained_despite_absences, Some(true));
        assert_eq!(data.justification, None);
        assert_eq!(data.days.len(), 31);
        assert_eq!(data.days[2].value, 'K');
        assert_eq!(data.days[4].value, 'C');
    }

    #[test]
    fn fill_data_with_sparse_contact() {
        let contact: Contact = serde_json::from_value(json!({})).unwrap();
        let period = june();
        let defaults = FormDefaults::default();
        let mut bare_deal = deal("9");
        bare_deal.contact_name = None;

        let data = build_fill_data(&FillInputs {
            period: &period,
            deal: &bare_deal,
            contact: &contact,
            absences: &[],
            running_total: 0,
            generated_on: d("2024-07-01"),
            defaults: &defaults,
        });

        assert_eq!(data.name, None);
        assert_eq!(data.postal_code_and_city.as_deref(), Some(", "));
        assert_eq!(data.customer_number, None);
        assert!(data.days.iter().all(|entry| entry.value == 'C'));
    }

    #[test]
    fn fill_data_name_falls_back_to_contact_full_name() {
        let contact: Contact =
            serde_json::from_value(json!({ "Full_Name": "Muster, Max" })).unwrap();
        let period = june();
        let defaults = FormDefaults::default();
        let mut unnamed_deal = deal("9");
        unnamed_deal.contact_name = Some(RecordRef::id("contact-9"));
        let inputs = |deal: &Deal| {
            build_fill_data(&FillInputs {
                period: &period,
                deal,
                contact: &contact,
                absences: &[],
                running_total: 0,
                generated_on: d("2024-07-01"),
                defaults: &defaults,
            })
        };

        assert_eq!(inputs(&unnamed_deal).name.as_deref(), Some("Muster, Max"));
        // The deal's lookup name wins when present
        assert_eq!(inputs(&deal("9")).name.as_deref(), Some("Test"));
    }

    #[test]
    fn names_include_deal_and_month() {
        assert_eq!(notification_name("42"), "Absence Notification for 42");
        assert_eq!(document_name("42", &june()), "absence_notification_42_2024-06");
    }
}
