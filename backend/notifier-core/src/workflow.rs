// src/workflow.rs
use chrono::NaiveDate;
use chrono_tz::Tz;
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};

use crate::aggregation::dedupe_absences;
use crate::config::FormDefaults;
use crate::form_document::{DocumentError, DocumentGenerator};
use crate::period::{Clock, Period, PeriodError};
use crate::reconcile::{
    absence_counts, build_fill_data, document_name, notification_name, responsible_contact,
    should_generate, summarize, DealAbsenceSummary, FillInputs, GenerationDecision,
};
use crate::zoho_client::{
    decode_records, encode_record, ensure_written, Absence, AbsenceLink, AbsenceNotification,
    Contact, ContactRole, Deal, LinkAbsencesUpdate, NewAbsenceNotification,
    NotificationCountsUpdate, NotificationStatus, RecordRef, RecordStore, ZohoError,
    CONTACT_FIELDS, CONTACT_ROLE_FIELDS, DEAL_FIELDS, MODULE_ABSENCES,
    MODULE_ABSENCE_NOTIFICATIONS, MODULE_CONTACTS, MODULE_DEALS, RELATED_CONTACT_ROLES,
};

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Store(#[from] ZohoError),

    #[error(transparent)]
    Period(#[from] PeriodError),

    #[error("Document generation failed: {0}")]
    Document(#[from] DocumentError),

    #[error("Contact {contact_id:?} of deal {deal_id} not found")]
    ContactNotFound {
        deal_id: String,
        contact_id: Option<String>,
    },
}

/// Result of processing a single deal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DealOutcome {
    Generated {
        deal_id: String,
        notification_id: String,
        period_days: i64,
        total_days: i64,
        document: String,
    },
    SkippedNoAbsences {
        deal_id: String,
    },
    SkippedMissingResponsible {
        deal_id: String,
    },
    Failed {
        deal_id: String,
        /// Set when the notification was created before the failure.
        notification_id: Option<String>,
        error: String,
    },
}

impl DealOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, DealOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub period: Period,
    pub outcomes: Vec<DealOutcome>,
}

impl RunReport {
    pub fn generated_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, DealOutcome::Generated { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_failure()).count()
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub timezone: Tz,
    pub decision_maker_role: String,
    pub form_defaults: FormDefaults,
}

// Zoho criteria dates are plain ISO dates
fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn absences_criteria(period: &Period) -> String {
    let (start, end) = (iso(period.start), iso(period.end));
    format!(
        "(end_date:between:{start},{end})or(start_date:between:{start},{end})",
        start = start,
        end = end
    )
}

pub fn prior_notifications_criteria(deal_ids: &[String], period: &Period) -> String {
    // With no earlier month the range collapses to empty
    let lower = period.previous().map_or(period.start, |previous| previous.end);
    format!(
        "(deal:in:{})and(End_Date:greater_equal:{})and(End_Date:less_than:{})",
        deal_ids.join(","),
        iso(lower),
        iso(period.start)
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Deal ids referenced by `absences`, first occurrence order.
pub fn unique_deal_ids(absences: &[Absence]) -> Vec<String> {
    let mut seen = HashSet::new();
    absences
        .iter()
        .filter_map(Absence::deal_id)
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

pub struct AbsenceNotificationService {
    store: Arc<dyn RecordStore>,
    documents: Arc<dyn DocumentGenerator>,
    clock: Arc<dyn Clock>,
    settings: WorkflowSettings,
}

impl AbsenceNotificationService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        documents: Arc<dyn DocumentGenerator>,
        clock: Arc<dyn Clock>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            documents,
            clock,
            settings,
        }
    }

    /// Runs one batch for the month `months_ago` months back.
    ///
    /// Fetch failures before the per-deal stage fail the whole run. After
    /// that, every deal ends in its own [`DealOutcome`].
    pub async fn run(&self, months_ago: u32) -> Result<RunReport, WorkflowError> {
        let now = self.clock.now();
        let period = Period::months_ago(now, months_ago, self.settings.timezone)?;
        let generated_on = now.with_timezone(&self.settings.timezone).date_naive();
        info!(
            "Starting absence notification run for period {} (from {})",
            period,
            period.first_instant().to_rfc3339()
        );

        let absences = self.fetch_absences(&period).await?;
        if absences.is_empty() {
            info!("No absences found for period {}", period);
            return Ok(RunReport {
                period,
                outcomes: Vec::new(),
            });
        }

        let deal_ids = unique_deal_ids(&absences);
        if deal_ids.is_empty() {
            warn!(
                "{} absences in period {} reference no deal",
                absences.len(),
                period
            );
            return Ok(RunReport {
                period,
                outcomes: Vec::new(),
            });
        }

        let deals = self.fetch_deals(&deal_ids).await?;
        let prior_notifications = self.fetch_prior_notifications(&deal_ids, &period).await?;
        info!(
            "Fetched {} absences, {} deals and {} prior notifications",
            absences.len(),
            deals.len(),
            prior_notifications.len()
        );

        let summaries = summarize(&deals, &absences, &prior_notifications);
        let outcomes = join_all(summaries.iter().map(|summary| {
            let span = info_span!("deal", deal_id = %summary.deal.id);
            AssertUnwindSafe(self.process_deal(summary, &period, generated_on))
                .catch_unwind()
                .map(move |result| {
                    result.unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        error!("Processing deal {} panicked: {}", summary.deal.id, message);
                        DealOutcome::Failed {
                            deal_id: summary.deal.id.clone(),
                            notification_id: None,
                            error: format!("panicked: {}", message),
                        }
                    })
                })
                .instrument(span)
                .boxed()
        }))
        .await;

        let report = RunReport { period, outcomes };
        info!(
            "Finished run for period {}: {} deals, {} generated, {} failed",
            report.period,
            report.outcomes.len(),
            report.generated_count(),
            report.failed_count()
        );
        Ok(report)
    }

    async fn fetch_absences(&self, period: &Period) -> Result<Vec<Absence>, WorkflowError> {
        let records = self
            .store
            .search(MODULE_ABSENCES, &absences_criteria(period))
            .await?;
        let absences: Vec<Absence> = decode_records(records)?;
        let unique = dedupe_absences(&absences);
        if unique.len() < absences.len() {
            info!("Dropped {} duplicate absences", absences.len() - unique.len());
        }
        Ok(unique)
    }

    async fn fetch_deals(&self, deal_ids: &[String]) -> Result<Vec<Deal>, WorkflowError> {
        let records = self.store.get(MODULE_DEALS, deal_ids, &DEAL_FIELDS).await?;
        Ok(decode_records(records)?)
    }

    async fn fetch_prior_notifications(
        &self,
        deal_ids: &[String],
        period: &Period,
    ) -> Result<Vec<AbsenceNotification>, WorkflowError> {
        let records = self
            .store
            .search(
                MODULE_ABSENCE_NOTIFICATIONS,
                &prior_notifications_criteria(deal_ids, period),
            )
            .await?;
        Ok(decode_records(records)?)
    }

    async fn process_deal(
        &self,
        summary: &DealAbsenceSummary,
        period: &Period,
        generated_on: NaiveDate,
    ) -> DealOutcome {
        let mut notification_id = None;
        match self
            .generate_for_deal(summary, period, generated_on, &mut notification_id)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Processing deal {} failed: {}", summary.deal.id, e);
                DealOutcome::Failed {
                    deal_id: summary.deal.id.clone(),
                    notification_id,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn generate_for_deal(
        &self,
        summary: &DealAbsenceSummary,
        period: &Period,
        generated_on: NaiveDate,
        notification_id: &mut Option<String>,
    ) -> Result<DealOutcome, WorkflowError> {
        let deal = &summary.deal;

        // Checked before the related-records lookup, which is the costly call
        if !summary.has_absences() {
            info!("Deal {} has no absences", deal.id);
            return Ok(DealOutcome::SkippedNoAbsences {
                deal_id: deal.id.clone(),
            });
        }

        let responsible = self.fetch_responsible_contact(&deal.id).await?;
        let responsible_id = responsible.as_ref().map(|role| role.id.as_str());
        let responsible_contact_id = match should_generate(summary, responsible_id) {
            GenerationDecision::Proceed {
                responsible_contact_id,
            } => responsible_contact_id,
            GenerationDecision::MissingResponsibleContact => {
                warn!(
                    "Deal {} has no '{}' contact role",
                    deal.id, self.settings.decision_maker_role
                );
                return Ok(DealOutcome::SkippedMissingResponsible {
                    deal_id: deal.id.clone(),
                });
            }
            GenerationDecision::NoAbsencesFound => {
                return Ok(DealOutcome::SkippedNoAbsences {
                    deal_id: deal.id.clone(),
                })
            }
        };

        let created_id = self
            .create_notification(deal, &responsible_contact_id, period)
            .await?;
        *notification_id = Some(created_id.clone());
        info!(
            "Created notification {} for deal {} and BA responsible {} <{}>",
            created_id,
            deal.id,
            responsible_contact_id,
            responsible
                .as_ref()
                .and_then(|role| role.email.as_deref())
                .unwrap_or("no email")
        );

        self.link_absences(&created_id, summary.absences()).await?;
        info!(
            "Linked {} absences to notification {}",
            summary.absences().len(),
            created_id
        );

        let counts = absence_counts(summary, period);
        let update = NotificationCountsUpdate {
            id: created_id.clone(),
            period_absence_days: counts.period_days,
            total_absence_days: counts.total_days,
            status: NotificationStatus::LinkedWithAbsences,
        };
        let results = self
            .store
            .update(MODULE_ABSENCE_NOTIFICATIONS, vec![encode_record(&update)?])
            .await?;
        ensure_written(MODULE_ABSENCE_NOTIFICATIONS, results)?;

        let contact = self.fetch_contact(deal).await?;
        let data = build_fill_data(&FillInputs {
            period,
            deal,
            contact: &contact,
            absences: summary.absences(),
            running_total: counts.total_days,
            generated_on,
            defaults: &self.settings.form_defaults,
        });
        let document = document_name(&deal.id, period);
        let bytes = self.documents.fill_document(&document, &data).await?;
        info!(
            "Generated document {} ({} bytes) for deal {}",
            document,
            bytes.len(),
            deal.id
        );

        Ok(DealOutcome::Generated {
            deal_id: deal.id.clone(),
            notification_id: created_id,
            period_days: counts.period_days,
            total_days: counts.total_days,
            document,
        })
    }

    async fn fetch_responsible_contact(
        &self,
        deal_id: &str,
    ) -> Result<Option<ContactRole>, WorkflowError> {
        let records = self
            .store
            .related(MODULE_DEALS, deal_id, RELATED_CONTACT_ROLES, &CONTACT_ROLE_FIELDS)
            .await?;
        let roles: Vec<ContactRole> = decode_records(records)?;
        Ok(responsible_contact(&roles, &self.settings.decision_maker_role).cloned())
    }

    async fn create_notification(
        &self,
        deal: &Deal,
        responsible_contact_id: &str,
        period: &Period,
    ) -> Result<String, WorkflowError> {
        let payload = NewAbsenceNotification {
            name: notification_name(&deal.id),
            deal: RecordRef::id(deal.id.clone()),
            start_date: period.start,
            end_date: period.end,
            ba_responsible: responsible_contact_id.to_string(),
            status: NotificationStatus::Created,
        };
        let results = self
            .store
            .create(MODULE_ABSENCE_NOTIFICATIONS, vec![encode_record(&payload)?])
            .await?;
        ensure_written(MODULE_ABSENCE_NOTIFICATIONS, results)?
            .into_iter()
            .next()
            .and_then(|result| result.details.id)
            .ok_or_else(|| {
                ZohoError::MissingCreatedId {
                    module: MODULE_ABSENCE_NOTIFICATIONS.to_string(),
                }
                .into()
            })
    }

    async fn link_absences(
        &self,
        notification_id: &str,
        absences: &[Absence],
    ) -> Result<(), WorkflowError> {
        if absences.is_empty() {
            return Ok(());
        }
        let update = LinkAbsencesUpdate {
            id: notification_id.to_string(),
            absences: absences
                .iter()
                .map(|absence| AbsenceLink {
                    absence: RecordRef::id(absence.id.clone()),
                })
                .collect(),
        };
        let results = self
            .store
            .update(MODULE_ABSENCE_NOTIFICATIONS, vec![encode_record(&update)?])
            .await?;
        ensure_written(MODULE_ABSENCE_NOTIFICATIONS, results)?;
        Ok(())
    }

    async fn fetch_contact(&self, deal: &Deal) -> Result<Contact, WorkflowError> {
        let not_found = |contact_id: Option<String>| WorkflowError::ContactNotFound {
            deal_id: deal.id.clone(),
            contact_id,
        };
        let contact_id = deal
            .contact_name
            .as_ref()
            .map(|lookup| lookup.id.clone())
            .ok_or_else(|| not_found(None))?;
        let record = self
            .store
            .get_by_id(MODULE_CONTACTS, &contact_id, &CONTACT_FIELDS)
            .await?
            .ok_or_else(|| not_found(Some(contact_id.clone())))?;
        Ok(serde_json::from_value(record).map_err(ZohoError::from)?)
    }
}
