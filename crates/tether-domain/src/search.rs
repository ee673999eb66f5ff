use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::event::DeviceEvent;

/// Inclusive date range applied to `event_date` on index queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRangeCriteria {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRangeCriteria {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.start > self.end {
            return Err(DomainError::InvalidCriteria(format!(
                "Range start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Zero-based page request against a storage query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
}

impl PageRequest {
    pub fn first(page_size: usize) -> Self {
        Self { page: 0, page_size }
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            page_size: self.page_size,
        }
    }

    pub fn offset(&self) -> usize {
        self.page * self.page_size
    }
}

/// One page of query results, ordered by `event_date` ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<DeviceEvent>,
    /// Total matching events across all pages.
    pub total: u64,
}
