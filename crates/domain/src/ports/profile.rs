use std::collections::HashMap;

use crate::DomainResult;
use crate::ports::BoxFuture;

pub trait ProfileResolver: Send + Sync {
    fn display_name_for(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<String>>>;

    /// Batch lookup; user ids without a profile are absent from the result.
    fn display_names_for(
        &self,
        user_ids: &[String],
    ) -> BoxFuture<'_, DomainResult<HashMap<String, String>>>;
}
