// src/ct_log/client.rs
use std::time::Duration;
use tracing::debug;

use super::types::{FetchRange, GetEntriesResponse, LogEntry, SignedTreeHead};
use crate::error::CtError;

/// HTTP client for the RFC 6962 subset this crate needs: `get-sth` and
/// `get-entries`. Built fresh per cycle since connect/read timeouts come
/// from `MonitorConfig`, which can change between cycles.
pub struct CtLogClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl CtLogClient {
    pub fn new(
        base_url: String,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .gzip(true)
            .build()?;

        Ok(Self {
            base_url,
            http_client,
        })
    }

    /// `GET {base}/ct/v1/get-sth`
    pub async fn get_sth(&self) -> Result<SignedTreeHead, CtError> {
        let url = format!("{}/ct/v1/get-sth", self.base_url);
        debug!("fetching STH from {}", url);

        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(CtError::HttpError(response.status().as_u16()));
        }

        let sth: SignedTreeHead = response.json().await?;
        debug!(
            "STH received: tree_size={}, timestamp={}",
            sth.tree_size, sth.timestamp
        );

        Ok(sth)
    }

    /// `GET {base}/ct/v1/get-entries?start={start}&end={end}`
    pub async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<LogEntry>, CtError> {
        let url = format!(
            "{}/ct/v1/get-entries?start={}&end={}",
            self.base_url, start, end
        );
        debug!("fetching entries {}-{} from {}", start, end, self.base_url);

        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(CtError::HttpError(response.status().as_u16()));
        }

        let entries: GetEntriesResponse = response.json().await?;
        debug!("received {} entries", entries.entries.len());

        Ok(entries.entries)
    }

    /// Fetches `[start, end]` in sequential chunks of at most `chunk_size`
    /// entries, concatenating in order. Aborts on the first failed chunk —
    /// the caller treats the whole cycle as failed rather than processing
    /// a partial range.
    pub async fn get_entries_chunked(
        &self,
        start: u64,
        end: u64,
        chunk_size: u64,
    ) -> Result<Vec<LogEntry>, CtError> {
        let mut all_entries = Vec::new();
        let mut current = start;

        loop {
            let chunk_end = std::cmp::min(current + chunk_size - 1, end);
            let mut chunk = self.get_entries(current, chunk_end).await?;
            all_entries.append(&mut chunk);

            if chunk_end >= end {
                break;
            }
            current = chunk_end + 1;
        }

        Ok(all_entries)
    }
}

/// Pure range calculator (§4.1). `last_processed_index` is negative when
/// nothing has yet been processed.
pub fn calculate_range(tree_size: u64, batch_size: u64, last_processed_index: i64) -> FetchRange {
    if tree_size == 0 {
        return FetchRange { start: 0, end: 0 };
    }

    let end = tree_size - 1;

    let start = if last_processed_index > 0 {
        (last_processed_index as u64) + 1
    } else {
        end.saturating_sub(batch_size.saturating_sub(1))
    };

    if start > end {
        return FetchRange { start: end, end };
    }

    let end = if end - start + 1 > batch_size {
        start + batch_size - 1
    } else {
        end
    };

    FetchRange { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn empty_tree_returns_no_work() {
        let r = calculate_range(0, 256, -1);
        assert_eq!(r, FetchRange { start: 0, end: 0 });
    }

    #[test]
    fn cold_start_bootstraps_from_tail() {
        let r = calculate_range(1_000_000, 256, -1);
        assert_eq!(
            r,
            FetchRange {
                start: 999_744,
                end: 999_999
            }
        );
    }

    #[test]
    fn catch_up_resumes_after_last_processed() {
        let r = calculate_range(510, 256, 500);
        assert_eq!(r, FetchRange { start: 501, end: 509 });
    }

    #[test]
    fn fully_caught_up_degenerates_to_single_point_at_tail() {
        let r = calculate_range(510, 256, 509);
        assert_eq!(r, FetchRange { start: 509, end: 509 });
    }

    #[test]
    fn truncates_to_batch_size() {
        let r = calculate_range(1000, 50, 0);
        assert_eq!(r.end - r.start + 1, 50);
    }

    #[test]
    fn small_tree_smaller_than_batch_bootstraps_from_zero() {
        let r = calculate_range(10, 256, -1);
        assert_eq!(r, FetchRange { start: 0, end: 9 });
    }

    #[test]
    fn property_range_is_always_sane() {
        let cases = [
            (0u64, 1u64, -1i64),
            (1, 1, -1),
            (5, 3, -1),
            (5, 3, 1),
            (5, 3, 4),
            (1_000_000, 256, 999_998),
            (1_000_000, 1, -1),
            (7, 100, -1),
        ];

        for (tree_size, batch_size, last_processed_index) in cases {
            let r = calculate_range(tree_size, batch_size, last_processed_index);
            assert!(
                r.start <= r.end,
                "start <= end for {:?}",
                (tree_size, batch_size, last_processed_index)
            );
            assert!(
                r.end < std::cmp::max(tree_size, 1),
                "end within bounds for {:?}",
                (tree_size, batch_size, last_processed_index)
            );
            assert!(
                r.end - r.start + 1 <= batch_size,
                "range within batch size for {:?}",
                (tree_size, batch_size, last_processed_index)
            );
        }
    }

    #[tokio::test]
    async fn get_sth_parses_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ct/v1/get-sth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tree_size": 12345,
                "timestamp": 1_700_000_000_000u64,
                "sha256_root_hash": "deadbeef",
                "tree_head_signature": "abcd"
            })))
            .mount(&server)
            .await;

        let client =
            CtLogClient::new(server.uri(), Duration::from_secs(5), Duration::from_secs(5))
                .unwrap();
        let sth = client.get_sth().await.unwrap();
        assert_eq!(sth.tree_size, 12345);
    }

    #[tokio::test]
    async fn get_sth_maps_5xx_to_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ct/v1/get-sth"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client =
            CtLogClient::new(server.uri(), Duration::from_secs(5), Duration::from_secs(5))
                .unwrap();
        let err = client.get_sth().await.unwrap_err();
        assert_eq!(err.code(), "CT_FETCH_ERROR");
    }

    #[tokio::test]
    async fn get_entries_chunked_concatenates_in_order() {
        let server = MockServer::start().await;

        let entry = |n: u8| LogEntry {
            leaf_input: format!("leaf-{}", n),
            extra_data: String::new(),
        };

        Mock::given(method("GET"))
            .and(path("/ct/v1/get-entries"))
            .and(query_param("start", "0"))
            .and(query_param("end", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(GetEntriesResponse {
                entries: vec![entry(0), entry(1)],
            }))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/ct/v1/get-entries"))
            .and(query_param("start", "2"))
            .and(query_param("end", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(GetEntriesResponse {
                entries: vec![entry(2)],
            }))
            .mount(&server)
            .await;

        let client =
            CtLogClient::new(server.uri(), Duration::from_secs(5), Duration::from_secs(5))
                .unwrap();
        let entries = client.get_entries_chunked(0, 2, 2).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].leaf_input, "leaf-2");
    }
}
