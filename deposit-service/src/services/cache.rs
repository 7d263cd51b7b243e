//! Redemption enquiry cache.

use crate::models::RedemptionEnquiry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Enquiries keyed by account number.
///
/// An entry is served only on the business date it was computed for and
/// while the account's matured flag is unchanged; anything that books a
/// transaction or closes the account must call [`invalidate`](Self::invalidate).
#[derive(Default)]
pub struct EnquiryCache {
    entries: DashMap<String, RedemptionEnquiry>,
}

impl EnquiryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_no: &str, now: DateTime<Utc>) -> Option<RedemptionEnquiry> {
        let entry = self.entries.get(account_no)?;
        let fresh = entry.computed_at.date_naive() == now.date_naive()
            && entry.is_matured == (now >= entry.maturity_date);
        fresh.then(|| entry.clone())
    }

    pub fn put(&self, enquiry: RedemptionEnquiry) {
        self.entries.insert(enquiry.account_no.clone(), enquiry);
    }

    pub fn invalidate(&self, account_no: &str) {
        self.entries.remove(account_no);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
