//! HTTP mirror client.
//!
//! Downloads are rooted at a mutable mirror base URL. When a request ends
//! up on a different URL after redirects and that URL still ends with the
//! requested path, the base is rewritten so every later request goes
//! straight to the real location. Redirects to anything but http/https
//! are refused.

use std::fs::File;
use std::io;

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::redirect;
use tracing::debug;
use url::Url;

use crate::error::DebstrapError;

const MAX_REDIRECTS: usize = 10;

/// Mirror-rooted downloader with a persistent HTTP client.
pub struct Mirror {
    base: String,
    client: Client,
}

impl Mirror {
    pub fn new(base: &str) -> Result<Self, DebstrapError> {
        let parsed = Url::parse(base)
            .map_err(|e| DebstrapError::Config(format!("invalid mirror URL {}: {}", base, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DebstrapError::Config(format!(
                "unsupported mirror protocol {}",
                parsed.scheme()
            )));
        }

        let policy = redirect::Policy::custom(|attempt| {
            let scheme = attempt.url().scheme().to_string();
            match scheme.as_str() {
                "http" | "https" => {
                    if attempt.previous().len() > MAX_REDIRECTS {
                        attempt.error("too many redirects")
                    } else {
                        attempt.follow()
                    }
                }
                scheme => attempt.error(format!("redirect to unsupported protocol {}", scheme)),
            }
        });

        let client = Client::builder()
            .redirect(policy)
            .build()
            .map_err(|e| DebstrapError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Downloads `base + "/" + source` into `dest`.
    ///
    /// On success, rewrites the base when the effective URL was redirected
    /// away but still carries the requested path as its suffix. There is
    /// no retry here; callers re-drive on failure.
    pub fn fetch(&mut self, source: &str, dest: &Utf8Path) -> Result<(), DebstrapError> {
        let url = format!("{}/{}", self.base, source);
        debug!(%url, "downloading");

        let mut response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| DebstrapError::Network {
                source_path: source.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DebstrapError::Network {
                source_path: source.to_string(),
                reason: format!("HTTP status {}", response.status()),
            });
        }

        let effective = response.url().to_string();

        let mut file =
            File::create(dest).map_err(|e| DebstrapError::io(dest.to_string(), e))?;
        io::copy(&mut response, &mut file)
            .map_err(|e| DebstrapError::io(format!("failed to write {}", dest), e))?;

        if effective != url
            && let Some(new_base) = rebased_mirror(&effective, source)
        {
            debug!(mirror = %new_base, "after redirect use mirror");
            self.base = new_base;
        }

        Ok(())
    }
}

/// The redirect-rebase rule: if the effective URL ends with `"/" + source`,
/// the new base is the effective URL minus that suffix.
fn rebased_mirror(effective: &str, source: &str) -> Option<String> {
    effective
        .strip_suffix(source)
        .and_then(|prefix| prefix.strip_suffix('/'))
        .map(str::to_string)
}
