//! Alert sink: structured alert events on the log stream plus a bounded
//! in-memory tail for the control plane and tests.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub level: String,
    pub message: String,
    pub labels: HashMap<String, String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AlertSink {
    recent: Arc<Mutex<VecDeque<Alert>>>,
    capacity: usize,
}

impl AlertSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn emit(
        &self,
        level: &str,
        message: impl Into<String>,
        labels: HashMap<String, String>,
    ) -> Uuid {
        let alert = Alert {
            id: Uuid::new_v4(),
            level: level.to_string(),
            message: message.into(),
            labels,
            at: Utc::now(),
        };

        match level {
            "critical" | "error" => {
                error!(alert = true, id = %alert.id, level, message = %alert.message, "alert")
            }
            _ => warn!(alert = true, id = %alert.id, level, message = %alert.message, "alert"),
        }

        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == self.capacity {
                recent.pop_front();
            }
            recent.push_back(alert.clone());
        }
        alert.id
    }

    pub fn recent(&self) -> Vec<Alert> {
        self.recent
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for AlertSink {
    fn default() -> Self {
        Self::new(256)
    }
}
