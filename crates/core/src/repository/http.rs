use super::{FhirRepository, SearchParams};
use crate::{MtbError, MtbResult};
use fhir::Bundle;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

const FHIR_JSON: &str = "application/fhir+json";

/// Upper bound on followed `next` links of one search.
const MAX_PAGES: usize = 200;

/// FHIR REST client for a remote repository.
pub struct HttpFhirRepository {
    client: Client,
    base_url: String,
}

impl HttpFhirRepository {
    pub fn new(base_url: &str) -> MtbResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn read_body(response: Response) -> MtbResult<String> {
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(MtbError::Repository(format!(
                "repository answered {status}: {body}"
            )));
        }
        Ok(body)
    }

    fn get_page(&self, url: &str, params: &SearchParams<'_>) -> MtbResult<Bundle> {
        let response = self
            .client
            .get(url)
            .query(params)
            .header(ACCEPT, FHIR_JSON)
            .send()?;
        Ok(Bundle::parse(&Self::read_body(response)?)?)
    }
}

impl FhirRepository for HttpFhirRepository {
    fn transaction(&self, bundle: &Bundle) -> MtbResult<Bundle> {
        tracing::info!(
            entries = bundle.entry.len(),
            url = %self.base_url,
            "submitting FHIR transaction"
        );
        let response = self
            .client
            .post(&self.base_url)
            .header(CONTENT_TYPE, FHIR_JSON)
            .header(ACCEPT, FHIR_JSON)
            .body(bundle.render()?)
            .send()?;
        Ok(Bundle::parse(&Self::read_body(response)?)?)
    }

    fn search(&self, resource_type: &str, params: &SearchParams<'_>) -> MtbResult<Bundle> {
        let url = format!("{}/{}", self.base_url, resource_type);
        let mut bundle = self.get_page(&url, params)?;

        let mut next = bundle.next_link().map(str::to_string);
        let mut pages = 1;
        while let Some(next_url) = next {
            if pages >= MAX_PAGES {
                tracing::warn!(%resource_type, pages, "search result truncated");
                break;
            }
            let page = self.get_page(&next_url, &[])?;
            next = page.next_link().map(str::to_string);
            bundle.entry.extend(page.entry);
            pages += 1;
        }
        bundle.link.clear();
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one HTTP request with a canned response and return the request head.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/fhir", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                head.push_str(&line);
            }
            let mut body_buf = vec![0u8; content_length];
            reader.read_exact(&mut body_buf).unwrap();

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status_line}\r\nContent-Type: application/fhir+json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            head
        });
        (base, handle)
    }

    #[test]
    fn search_sends_parameters_and_parses_bundle() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"resourceType":"Bundle","type":"searchset","entry":[{"resource":{"resourceType":"Specimen","id":"5"}}]}"#,
        );
        let repository = HttpFhirRepository::new(&format!("{base}/")).unwrap();
        let bundle = repository.search("Specimen", &[("_id", "5")]).unwrap();

        assert_eq!(bundle.entry.len(), 1);
        let head = server.join().unwrap();
        assert!(head.starts_with("GET /fhir/Specimen?_id=5 "), "{head}");
    }

    #[test]
    fn rejected_transaction_is_a_repository_error() {
        let (base, server) = serve_once(
            "412 Precondition Failed",
            r#"{"resourceType":"OperationOutcome"}"#,
        );
        let repository = HttpFhirRepository::new(&base).unwrap();
        let err = repository
            .transaction(&Bundle::transaction())
            .expect_err("412 must fail");

        assert!(matches!(err, MtbError::Repository(_)));
        let head = server.join().unwrap();
        assert!(head.starts_with("POST /fhir "), "{head}");
    }
}
