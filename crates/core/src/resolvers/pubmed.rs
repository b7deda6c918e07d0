use super::PublicationResolver;
use crate::{MtbError, MtbResult};
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

/// Publication titles from NCBI E-utilities `esummary`.
pub struct PubmedClient {
    client: Client,
    base_url: String,
}

impl PubmedClient {
    pub fn new(base_url: &str) -> MtbResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn fetch_summary(&self, pmid: u64) -> MtbResult<Value> {
        let url = format!("{}/esummary.fcgi", self.base_url);
        let id = pmid.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("db", "pubmed"), ("id", id.as_str()), ("retmode", "json")])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(MtbError::Publication {
                pmid,
                reason: format!("esummary answered {status}"),
            });
        }
        Ok(response.json()?)
    }
}

impl PublicationResolver for PubmedClient {
    fn resolve(&self, pmid: u64) -> MtbResult<String> {
        let summary = self.fetch_summary(pmid)?;
        summary
            .pointer(&format!("/result/{pmid}/title"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string)
            .ok_or_else(|| MtbError::Publication {
                pmid,
                reason: "summary has no title".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    fn serve_json(body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/eutils", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            request_line
        });
        (base, handle)
    }

    #[test]
    fn resolves_title_from_summary() {
        let (base, server) = serve_json(
            r#"{"result":{"uids":["12345"],"12345":{"uid":"12345","title":"Improved survival with vemurafenib."}}}"#,
        );
        let client = PubmedClient::new(&base).unwrap();
        assert_eq!(
            client.resolve(12345).unwrap(),
            "Improved survival with vemurafenib."
        );
        let request_line = server.join().unwrap();
        assert!(
            request_line.starts_with("GET /eutils/esummary.fcgi?db=pubmed&id=12345&retmode=json "),
            "{request_line}"
        );
    }

    #[test]
    fn summary_without_title_is_a_publication_error() {
        let (base, server) = serve_json(r#"{"result":{"uids":[]}}"#);
        let client = PubmedClient::new(&base).unwrap();
        let err = client.resolve(1).expect_err("no title");
        assert!(matches!(err, MtbError::Publication { pmid: 1, .. }));
        server.join().unwrap();
    }
}
