//! Scannable redemption payloads.
//!
//! A payload is `VG1.<ticket-number>.<valid-date>.<hex fingerprint>`, where
//! the fingerprint is an HMAC-SHA256 over the ticket number and date. A
//! valid payload only identifies a ticket; redemption still checks the
//! stored ticket.

use crate::error::{AdmissionError, TicketRejection};
use crate::types::TicketNumber;
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const VERSION: &str = "VG1";

/// Signs and verifies redemption payloads with a shared secret.
#[derive(Clone)]
pub struct RedemptionSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for RedemptionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedemptionSigner").finish_non_exhaustive()
    }
}

impl RedemptionSigner {
    /// Signer keyed by `secret`.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::InvalidConfiguration`] for an empty or unusable
    /// secret.
    pub fn new(secret: &[u8]) -> Result<Self, AdmissionError> {
        if secret.is_empty() {
            return Err(AdmissionError::InvalidConfiguration(
                "ticket secret must not be empty".to_string(),
            ));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|err| AdmissionError::InvalidConfiguration(format!("invalid ticket secret: {err}")))?;
        Ok(Self { mac })
    }

    fn fingerprint(&self, ticket_number: &str, valid_date: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(ticket_number.as_bytes());
        mac.update(b".");
        mac.update(valid_date.as_bytes());
        mac
    }

    /// Payload for `ticket_number`, valid on `valid_date`.
    #[must_use]
    pub fn sign(&self, ticket_number: &TicketNumber, valid_date: NaiveDate) -> String {
        let date = valid_date.to_string();
        let mac = self.fingerprint(ticket_number.as_str(), &date);
        format!(
            "{VERSION}.{ticket_number}.{date}.{}",
            hex::encode(mac.finalize().into_bytes())
        )
    }

    /// Ticket number carried by an untampered `payload`.
    ///
    /// # Errors
    ///
    /// [`TicketRejection::Tampered`] if the payload is malformed or its
    /// fingerprint does not match.
    pub fn verify(&self, payload: &str) -> Result<(TicketNumber, NaiveDate), AdmissionError> {
        let tampered = || AdmissionError::InvalidTicket(TicketRejection::Tampered);

        let mut parts = payload.trim().split('.');
        let (Some(version), Some(number), Some(date), Some(fingerprint), None) =
            (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(tampered());
        };
        if version != VERSION {
            return Err(tampered());
        }

        let expected = hex::decode(fingerprint).map_err(|_| tampered())?;
        self.fingerprint(number, date)
            .verify_slice(&expected)
            .map_err(|_| tampered())?;

        let valid_date = date.parse::<NaiveDate>().map_err(|_| tampered())?;
        Ok((TicketNumber::parse(number), valid_date))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn signer() -> RedemptionSigner {
        RedemptionSigner::new(b"test-secret").unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
    }

    #[test]
    fn signed_payload_verifies() {
        let number = TicketNumber::format("FD", 2025, 7);
        let payload = signer().sign(&number, date());

        assert!(payload.starts_with("VG1.FD-2025-000007.2025-01-06."));
        assert_eq!(signer().verify(&payload).unwrap(), (number, date()));
    }

    #[test]
    fn edited_ticket_number_is_tampered() {
        let payload = signer().sign(&TicketNumber::format("FD", 2025, 7), date());
        let forged = payload.replace("000007", "000008");

        assert_eq!(
            signer().verify(&forged),
            Err(AdmissionError::InvalidTicket(TicketRejection::Tampered))
        );
    }

    #[test]
    fn other_secret_is_tampered() {
        let payload = signer().sign(&TicketNumber::format("FD", 2025, 7), date());
        let other = RedemptionSigner::new(b"another-secret").unwrap();

        assert!(other.verify(&payload).is_err());
    }

    #[test]
    fn malformed_payloads_are_tampered() {
        for payload in ["", "VG1", "VG1.FD-2025-000001.2025-01-06", "VG2.a.b.cc", "VG1.a.b.zz.extra"] {
            assert_eq!(
                signer().verify(payload),
                Err(AdmissionError::InvalidTicket(TicketRejection::Tampered)),
                "{payload}"
            );
        }
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(
            RedemptionSigner::new(b""),
            Err(AdmissionError::InvalidConfiguration(_))
        ));
    }
}
