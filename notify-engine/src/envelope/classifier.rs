//! Delivery classifier.
//!
//! Maps a domain event to a [`NotificationEnvelope`]. Classification is pure:
//! the same inputs always produce the same envelope apart from `created_at`.

use chrono::Utc;

use super::{
    InterruptionLevel, NotificationAction, NotificationCategory, NotificationEnvelope,
    NotificationInput, NotificationPriority, Presentation,
};
use crate::{Error, Result};

/// Classify a notification of `kind` using category defaults.
///
/// `priority_hint` is ignored for emergencies, which are always high priority.
pub fn classify(
    kind: NotificationCategory,
    title: &str,
    body: &str,
    priority_hint: Option<NotificationPriority>,
) -> Result<NotificationEnvelope> {
    classify_input(NotificationInput {
        category: Some(kind),
        title: title.to_string(),
        body: body.to_string(),
        priority: priority_hint,
        ..Default::default()
    })
}

/// Classify a caller-built notification.
///
/// Explicit fields override category defaults, except that an emergency is
/// always critical, fully relevant and persistent.
pub fn classify_input(input: NotificationInput) -> Result<NotificationEnvelope> {
    let title = input.title.trim();
    let body = input.body.trim();
    if title.is_empty() {
        return Err(Error::validation("notification title must not be empty"));
    }
    if body.is_empty() {
        return Err(Error::validation("notification body must not be empty"));
    }

    let category = input.category.unwrap_or(NotificationCategory::Custom);

    let priority = match category {
        NotificationCategory::Emergency => NotificationPriority::High,
        _ => input.priority.unwrap_or_else(|| category.default_priority()),
    };

    let interruption_level = match category {
        NotificationCategory::Emergency => InterruptionLevel::Critical,
        NotificationCategory::Alert => input.interruption_level.unwrap_or(
            if priority == NotificationPriority::High {
                InterruptionLevel::TimeSensitive
            } else {
                InterruptionLevel::Active
            },
        ),
        _ => input
            .interruption_level
            .unwrap_or_else(|| category.default_interruption_level()),
    };

    let relevance_score = match category {
        NotificationCategory::Emergency => 1.0,
        _ => clamp_relevance(input.relevance_score, category.default_relevance()),
    };

    let requires_interaction = match category {
        NotificationCategory::Emergency => true,
        _ => input
            .requires_interaction
            .unwrap_or(priority == NotificationPriority::High),
    };

    let thread_key = input
        .thread_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .or_else(|| Some(category.as_str().to_string()));

    Ok(NotificationEnvelope {
        title: title.to_string(),
        body: body.to_string(),
        category,
        priority,
        interruption_level,
        relevance_score,
        thread_key,
        requires_interaction,
        actions: resolve_actions(category, input.actions.as_deref()),
        created_at: Utc::now(),
        presentation: Presentation::default(),
        data: input.data,
    })
}

fn clamp_relevance(score: Option<f64>, default: f64) -> f64 {
    match score {
        Some(s) if s.is_nan() => default,
        Some(s) => s.clamp(0.0, 1.0),
        None => default,
    }
}

/// Keep only the actions registered for `category`, in the requested order.
fn resolve_actions(
    category: NotificationCategory,
    requested: Option<&[String]>,
) -> Vec<NotificationAction> {
    let registered = category.registered_actions();
    match requested {
        None => registered
            .iter()
            .map(|id| NotificationAction::from_id(id))
            .collect(),
        Some(ids) => {
            let mut actions: Vec<NotificationAction> = Vec::with_capacity(ids.len());
            for id in ids {
                let id = id.trim();
                if registered.contains(&id) && !actions.iter().any(|a| a.id == id) {
                    actions.push(NotificationAction::from_id(id));
                }
            }
            actions
        }
    }
}
