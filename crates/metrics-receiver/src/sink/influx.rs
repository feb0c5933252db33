// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB write client (v1 and v2 HTTP APIs).
//!
//! - v1: `POST {connection}/write?db={db_name}&precision=ns`, basic auth
//!   when a username is configured.
//! - v2: `POST {connection}/api/v2/write?org={org}&bucket={db_name}&precision=ns`
//!   with `Authorization: Token {auth_token}`.

use super::timeseries::TimeSeriesClient;
use crate::config::{OutputConfig, TimeSeriesOutput};
use crate::error::BackendError;
use crate::line_protocol::encode_point;
use crate::point::Point;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use tracing::trace;

#[derive(Debug, Clone)]
enum Auth {
    None,
    Basic { username: String, password: String },
    Token(String),
}

/// HTTP client for one InfluxDB output.
#[derive(Debug, Clone)]
pub struct InfluxClient {
    client: Client,
    write_url: Url,
    auth: Auth,
}

impl InfluxClient {
    pub fn new(output: &TimeSeriesOutput) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(output.write_timeout()).build()?;
        let base = output.connection.trim_end_matches('/');

        let (write_url, auth) = match output.version {
            1 => {
                let mut url = parse_url(&format!("{}/write", base))?;
                url.query_pairs_mut()
                    .append_pair("db", &output.db_name)
                    .append_pair("precision", "ns");
                let auth = if output.username.is_empty() {
                    Auth::None
                } else {
                    Auth::Basic {
                        username: output.username.clone(),
                        password: output.password.clone(),
                    }
                };
                (url, auth)
            }
            2 => {
                let mut url = parse_url(&format!("{}/api/v2/write", base))?;
                url.query_pairs_mut()
                    .append_pair("org", &output.org)
                    .append_pair("bucket", &output.db_name)
                    .append_pair("precision", "ns");
                let auth = if output.auth_token.is_empty() {
                    Auth::None
                } else {
                    Auth::Token(output.auth_token.clone())
                };
                (url, auth)
            }
            other => {
                return Err(BackendError::Config(format!(
                    "unsupported InfluxDB version {}",
                    other
                )))
            }
        };

        Ok(Self {
            client,
            write_url,
            auth,
        })
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    /// POST a newline-separated Line Protocol body.
    pub async fn write_lines(&self, body: String) -> Result<(), BackendError> {
        let mut request = self
            .client
            .post(self.write_url.clone())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);

        request = match &self.auth {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::Token(token) => request.header(AUTHORIZATION, format!("Token {}", token)),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

impl TimeSeriesClient for InfluxClient {
    async fn write_point(&self, point: &Point) -> Result<(), BackendError> {
        let line = encode_point(point)?;
        trace!("POST {} {}", self.write_url, line);
        self.write_lines(line).await
    }
}

fn parse_url(raw: &str) -> Result<Url, BackendError> {
    Url::parse(raw).map_err(|e| BackendError::Config(format!("invalid URL '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_url_and_auth() {
        let mut output = TimeSeriesOutput::new("ts", "http://influx:8086/", "metrics");
        output.username = "writer".into();
        output.password = "secret".into();

        let client = InfluxClient::new(&output).unwrap();
        assert_eq!(
            client.write_url().as_str(),
            "http://influx:8086/write?db=metrics&precision=ns"
        );
        assert!(matches!(client.auth, Auth::Basic { ref username, .. } if username == "writer"));
    }

    #[test]
    fn test_v2_url_and_token() {
        let mut output = TimeSeriesOutput::new("ts", "https://cloud.example", "bucket one");
        output.version = 2;
        output.org = "acme".into();
        output.auth_token = "tok".into();

        let client = InfluxClient::new(&output).unwrap();
        assert_eq!(
            client.write_url().as_str(),
            "https://cloud.example/api/v2/write?org=acme&bucket=bucket+one&precision=ns"
        );
        assert!(matches!(client.auth, Auth::Token(ref t) if t == "tok"));
    }

    #[test]
    fn test_invalid_connection() {
        let output = TimeSeriesOutput::new("ts", "not a url", "db");
        assert!(matches!(
            InfluxClient::new(&output),
            Err(BackendError::Config(_))
        ));
    }
}
