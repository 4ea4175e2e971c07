use chrono::{DateTime, FixedOffset};
use serde::{self, Deserialize, Deserializer, Serialize};

/// Payment status as reported by the platform API. `Unknown` absorbs any
/// status the server adds later so polling can keep going instead of erroring.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentOrder {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub status: PaymentStatus,
    #[serde(rename = "createdAt", deserialize_with = "from_opt_datetime", default)]
    pub created_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TeamMember {
    pub name: String,
    pub email: Option<String>,
    pub college: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Registration {
    pub id: String,
    #[serde(rename = "eventId")]
    pub event_id: String,
    #[serde(rename = "eventTitle")]
    pub event_title: String,
    pub name: String,
    pub email: Option<String>,
    pub college: String,
    #[serde(rename = "isTeamRegistration", default)]
    pub is_team_registration: bool,
    #[serde(rename = "teamMembers", default)]
    pub team_members: Vec<TeamMember>,
    #[serde(rename = "sessionCheckedIn", default)]
    pub session_checked_in: bool,
}

/// One certificate to produce. Derived per request from a registration or a
/// team member record, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecipient {
    pub name: String,
    pub college: String,
    pub event_name: String,
    /// Absent for ad-hoc/manual entries; only needed for the send path.
    pub email: Option<String>,
}

impl CertificateRecipient {
    pub fn leader_of(registration: &Registration) -> Self {
        Self {
            name: registration.name.clone(),
            college: registration.college.clone(),
            event_name: registration.event_title.clone(),
            email: registration.email.clone(),
        }
    }

    pub fn member_of(registration: &Registration, member: &TeamMember) -> Self {
        Self {
            name: member.name.clone(),
            college: member
                .college
                .clone()
                .unwrap_or_else(|| registration.college.clone()),
            event_name: registration.event_title.clone(),
            email: member.email.clone(),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct DispatchRecipient {
    pub name: String,
    pub email: Option<String>,
    pub college: String,
    #[serde(rename = "certificateImage")]
    pub certificate_image: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct CertificateDispatch {
    #[serde(rename = "eventId")]
    pub event_id: String,
    #[serde(rename = "eventTitle")]
    pub event_title: String,
    pub recipients: Vec<DispatchRecipient>,
}

/// Bulk-send progress counter. `total` is fixed when the batch starts and
/// `sent` only ever moves forward within one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSendProgress {
    pub sent: usize,
    pub total: usize,
}

fn from_opt_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    if let Some(s) = opt {
        let dt = DateTime::parse_from_rfc3339(&s).map_err(serde::de::Error::custom)?;
        Ok(Some(dt))
    } else {
        Ok(None)
    }
}
