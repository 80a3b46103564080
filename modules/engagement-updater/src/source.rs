//! Produces entity references from the query API.

use std::sync::Arc;

use chrono::Utc;
use futures::{stream, Stream};
use mo_client::EngagementStub;
use tracing::debug;
use updater_common::{EntityReference, LookupError, UpstreamError};
use uuid::Uuid;

use crate::traits::QueryApi;

#[derive(Clone)]
pub struct EngagementSource {
    query: Arc<dyn QueryApi>,
    page_size: usize,
}

impl EngagementSource {
    pub fn new(query: Arc<dyn QueryApi>, page_size: usize) -> Self {
        Self {
            query,
            page_size: page_size.max(1),
        }
    }

    /// Every engagement MO knows about, one page at a time.
    ///
    /// Pages are fetched only as the stream is polled. A failed page fetch is
    /// yielded once and ends the stream.
    pub fn enumerate_all(
        &self,
    ) -> impl Stream<Item = Result<EntityReference, UpstreamError>> + Send + 'static {
        let cursor = PageCursor {
            query: self.query.clone(),
            page_size: self.page_size,
            offset: 0,
            buffered: Vec::new().into_iter(),
            exhausted: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            loop {
                if let Some(stub) = cursor.buffered.next() {
                    return Some((Ok(reference(stub)), cursor));
                }
                if cursor.exhausted {
                    return None;
                }
                match cursor
                    .query
                    .engagement_page(cursor.page_size, cursor.offset)
                    .await
                {
                    Ok(page) => {
                        debug!(
                            offset = cursor.offset,
                            scanned = page.scanned,
                            current = page.engagements.len(),
                            "Fetched engagement page"
                        );
                        if page.scanned == 0 {
                            return None;
                        }
                        cursor.offset += page.scanned;
                        cursor.exhausted = page.scanned < cursor.page_size;
                        cursor.buffered = page.engagements.into_iter();
                    }
                    Err(e) => {
                        cursor.exhausted = true;
                        return Some((Err(e), cursor));
                    }
                }
            }
        })
    }

    /// The reference for a single engagement.
    pub async fn lookup_one(&self, engagement: Uuid) -> Result<EntityReference, LookupError> {
        let found = self
            .query
            .engagement(engagement)
            .await?
            .ok_or(LookupError::NotFound(engagement))?;
        Ok(EntityReference::new(
            found.uuid,
            found.employee_uuid,
            Utc::now(),
        ))
    }
}

struct PageCursor {
    query: Arc<dyn QueryApi>,
    page_size: usize,
    offset: usize,
    buffered: std::vec::IntoIter<EngagementStub>,
    exhausted: bool,
}

fn reference(stub: EngagementStub) -> EntityReference {
    EntityReference::new(stub.uuid, stub.employee_uuid, Utc::now())
}
