use std::time::Duration;

use reqwest::{
    blocking::Client,
    header::{ACCEPT, USER_AGENT},
    StatusCode,
};

use crate::error::EtlError;

/// Something that returns the body of a url as text.
pub trait TextSource {
    fn get_text(&self, url: &str) -> Result<String, EtlError>;
}

pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    /// The client has no request timeout, a download blocks until the server
    /// is done.
    pub fn new() -> Result<HttpSource, EtlError> {
        let client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| EtlError::Retrieval {
                url: String::new(),
                reason: format!("failed to build http client: {}", e),
            })?;
        Ok(HttpSource { client })
    }
}

impl TextSource for HttpSource {
    fn get_text(&self, url: &str) -> Result<String, EtlError> {
        let retrieval = |reason: String| EtlError::Retrieval {
            url: url.to_string(),
            reason,
        };
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36")
            .header(ACCEPT, "text/csv,text/plain,*/*")
            .send()
            .map_err(|e| retrieval(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(retrieval(format!("download failed with status {}", response.status())));
        }
        response.text().map_err(|e| retrieval(format!("invalid body: {}", e)))
    }
}
