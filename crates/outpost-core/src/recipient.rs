// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recipient normalisation for phone-number addressed channels.

use serde::{Deserialize, Serialize};

use crate::error::OutpostError;
use crate::types::{NewJob, SubmitRequest};

const MIN_DIGITS: usize = 10;
const MAX_DIGITS: usize = 15;
const CHAT_SUFFIX: &str = "@c.us";

/// A recipient in all three forms the queue keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecipient {
    /// Exactly what the caller supplied.
    pub original: String,
    /// Digits only, with country code.
    pub formatted: String,
    /// Destination identifier on the channel.
    pub chat_id: String,
}

/// Normalises `raw` into an international number and channel destination id.
///
/// Non-digits are stripped and the digit count must be within 10..=15. A
/// leading `0` is replaced with `country_code`; numbers not already starting
/// with `country_code` get it prefixed.
pub fn normalize_recipient(
    raw: &str,
    country_code: &str,
) -> Result<NormalizedRecipient, OutpostError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_DIGITS || digits.len() > MAX_DIGITS {
        return Err(OutpostError::Validation(format!(
            "invalid phone number length for '{raw}': must be {MIN_DIGITS}-{MAX_DIGITS} digits"
        )));
    }

    let formatted = match digits.strip_prefix('0') {
        Some(rest) => format!("{country_code}{rest}"),
        None if digits.starts_with(country_code) => digits,
        None => format!("{country_code}{digits}"),
    };

    Ok(NormalizedRecipient {
        original: raw.to_string(),
        chat_id: format!("{formatted}{CHAT_SUFFIX}"),
        formatted,
    })
}

impl SubmitRequest {
    /// Validates the request and turns it into a store payload.
    pub fn into_new_job(self, country_code: &str, max_attempts: u32) -> Result<NewJob, OutpostError> {
        if self.body.trim().is_empty() {
            return Err(OutpostError::Validation("message body is required".into()));
        }
        if self.recipient.trim().is_empty() {
            return Err(OutpostError::Validation("recipient is required".into()));
        }
        let recipient = normalize_recipient(&self.recipient, country_code)?;
        let job = NewJob {
            message_id: self.message_id,
            chat_id: recipient.chat_id,
            body: self.body,
            formatted_recipient: recipient.formatted,
            original_recipient: recipient.original,
            priority: self.priority,
            delay_ms: self.delay_ms,
            max_attempts,
        };
        job.validate()?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    #[test]
    fn local_number_gets_country_code() {
        let r = normalize_recipient("0812-3456-789", "62").unwrap();
        assert_eq!(r.formatted, "628123456789");
        assert_eq!(r.chat_id, "628123456789@c.us");
        assert_eq!(r.original, "0812-3456-789");
    }

    #[test]
    fn international_number_is_kept() {
        let r = normalize_recipient("+62 812 3456 789", "62").unwrap();
        assert_eq!(r.formatted, "628123456789");
    }

    #[test]
    fn bare_subscriber_number_is_prefixed() {
        let r = normalize_recipient("8123456789", "62").unwrap();
        assert_eq!(r.formatted, "628123456789");
    }

    #[test]
    fn rejects_out_of_range_lengths() {
        assert!(matches!(
            normalize_recipient("12345", "62"),
            Err(OutpostError::Validation(_))
        ));
        assert!(normalize_recipient("1234567890123456", "62").is_err());
    }

    #[test]
    fn submit_request_becomes_new_job() {
        let req = SubmitRequest {
            recipient: "08123456789".into(),
            body: "hi".into(),
            priority: Priority::High,
            delay_ms: 1_000,
            message_id: Some("abc".into()),
        };
        let job = req.into_new_job("62", 5).unwrap();
        assert_eq!(job.chat_id, "628123456789@c.us");
        assert_eq!(job.priority, Priority::High);
        assert_eq!(job.delay_ms, 1_000);
        assert_eq!(job.message_id.as_deref(), Some("abc"));
    }

    #[test]
    fn submit_request_requires_body() {
        let req = SubmitRequest {
            recipient: "08123456789".into(),
            body: " ".into(),
            priority: Priority::Normal,
            delay_ms: 0,
            message_id: None,
        };
        assert!(matches!(
            req.into_new_job("62", 5),
            Err(OutpostError::Validation(_))
        ));
    }
}
