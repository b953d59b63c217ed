// Reservation domain types as exchanged with the reservations API
// Dates travel as ISO-8601 strings and are held as chrono values in memory

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;
use crate::format;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl ReservationStatus {
    fn rank(self) -> u8 {
        match self {
            ReservationStatus::Pending => 0,
            ReservationStatus::Confirmed => 1,
            ReservationStatus::CheckedIn => 2,
            ReservationStatus::CheckedOut => 3,
            ReservationStatus::Cancelled => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReservationStatus::CheckedOut | ReservationStatus::Cancelled
        )
    }

    // Statuses only move forward; CheckedOut and Cancelled are final.
    // Cancelling is possible from any non-terminal state, checked-in guests included.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == ReservationStatus::Cancelled || next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::CheckedIn => "checked_in",
            ReservationStatus::CheckedOut => "checked_out",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Refunded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub guest_id: String,
    pub room_id: String,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub occupants: u32,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_requests: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
}

impl Reservation {
    pub fn nights(&self) -> i64 {
        format::nights_between(self.check_in.date_naive(), self.check_out.date_naive())
    }

    // Checks the invariants a server-issued record must hold
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.check_out <= self.check_in {
            return Err(ValidationError::InvalidDateRange);
        }
        if self.occupants < 1 {
            return Err(ValidationError::InvalidOccupants(self.occupants));
        }
        Ok(())
    }
}

// Payload for creating a reservation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservation {
    pub guest_id: String,
    pub room_id: String,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub occupants: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_requests: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
}

// Partial update; absent fields are left untouched by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupants: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReservationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_requests: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
}

impl ReservationPatch {
    pub fn is_empty(&self) -> bool {
        self == &ReservationPatch::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReservation {
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationFilters {
    pub status: Option<ReservationStatus>,
    pub guest_id: Option<String>,
    pub room_id: Option<String>,
    pub check_in_from: Option<NaiveDate>,
    pub check_in_to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ReservationFilters {
    // Query parameters in canonical (sorted) order, unset fields omitted
    pub fn to_query(&self) -> BTreeMap<String, String> {
        let mut query = BTreeMap::new();
        if let Some(status) = self.status {
            query.insert("status".to_string(), status.to_string());
        }
        if let Some(guest_id) = &self.guest_id {
            query.insert("guestId".to_string(), guest_id.clone());
        }
        if let Some(room_id) = &self.room_id {
            query.insert("roomId".to_string(), room_id.clone());
        }
        if let Some(from) = self.check_in_from {
            query.insert("checkInFrom".to_string(), from.to_string());
        }
        if let Some(to) = self.check_in_to {
            query.insert("checkInTo".to_string(), to.to_string());
        }
        if let Some(page) = self.page {
            query.insert("page".to_string(), page.to_string());
        }
        if let Some(limit) = self.limit {
            query.insert("limit".to_string(), limit.to_string());
        }
        query
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPage {
    #[serde(default)]
    pub reservations: Vec<Reservation>,
    #[serde(default)]
    pub total: u64,
}

impl ReservationPage {
    pub fn contains(&self, reservation_id: &str) -> bool {
        self.reservations.iter().any(|r| r.id == reservation_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateQuery {
    pub room_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl RateQuery {
    pub fn to_query(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("roomId".to_string(), self.room_id.clone()),
            ("startDate".to_string(), self.start_date.to_string()),
            ("endDate".to_string(), self.end_date.to_string()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDetails {
    pub date: NaiveDate,
    pub base_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_rate: Option<f64>,
    pub total_rate: f64,
}

impl RateDetails {
    // Builds a rate with its total computed from the effective nightly rate
    pub fn new(
        date: NaiveDate,
        base_rate: f64,
        dynamic_rate: Option<f64>,
        nights: u32,
        tax_rate: f64,
        flat_fee: f64,
    ) -> Result<Self, ValidationError> {
        if !base_rate.is_finite() || base_rate < 0.0 {
            return Err(ValidationError::InvalidRate(format!(
                "base rate {} must be a non-negative number",
                base_rate
            )));
        }
        if let Some(dynamic) = dynamic_rate {
            if !dynamic.is_finite() || dynamic < 0.0 || dynamic > base_rate {
                return Err(ValidationError::InvalidRate(format!(
                    "dynamic rate {} must lie within 0..={}",
                    dynamic, base_rate
                )));
            }
        }

        let effective = dynamic_rate.unwrap_or(base_rate);
        Ok(Self {
            date,
            base_rate,
            dynamic_rate,
            total_rate: format::calculate_total_rate(effective, nights, tax_rate, flat_fee),
        })
    }

    pub fn effective_rate(&self) -> f64 {
        self.dynamic_rate.unwrap_or(self.base_rate)
    }

    pub fn is_discounted(&self) -> bool {
        self.dynamic_rate.map_or(false, |d| d < self.base_rate)
    }
}
