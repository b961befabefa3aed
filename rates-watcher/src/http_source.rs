use std::error::Error as _;
use std::time::Duration;

use log::debug;
use rates_core::{FetchError, Quote, QuoteSource, parse_snapshot};
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::header::ACCEPT;

use crate::config;

/// HTTP-источник снимков: один GET на цикл, без повторов.
pub(crate) struct HttpQuoteSource {
    url: String,
    client: Client,
}

impl HttpQuoteSource {
    pub(crate) fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        Self::with_builder(
            url,
            Client::builder().timeout(timeout).connect_timeout(timeout),
        )
    }

    fn with_builder(url: impl Into<String>, builder: ClientBuilder) -> reqwest::Result<Self> {
        let client = builder.user_agent(config::USER_AGENT).build()?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl QuoteSource for HttpQuoteSource {
    fn fetch(&self) -> Result<Vec<Quote>, FetchError> {
        debug!("GET {}", self.url);

        let resp = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|e| FetchError::Unreachable(describe(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamError {
                status: status.as_u16(),
            });
        }

        // обрыв или таймаут посреди тела - тоже недоступность
        let body = resp
            .text()
            .map_err(|e| FetchError::Unreachable(describe(&e)))?;

        parse_snapshot(&body)
    }
}

/// Текст ошибки reqwest вместе с цепочкой причин (connection refused и т.п.).
pub(crate) fn describe(e: &reqwest::Error) -> String {
    let mut msg = if e.is_timeout() {
        "timed out".to_string()
    } else {
        e.to_string()
    };

    let mut source = e.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_http::serve_once;
    use rust_decimal_macros::dec;
    use std::net::TcpListener;

    const BODY: &str = r#"[
        {"moneda":"USD","casa":"oficial","nombre":"Oficial","compra":905.5,"venta":945,
         "fechaActualizacion":"2024-10-18T15:00:00.000Z"},
        {"moneda":"USD","casa":"blue","nombre":"Blue","compra":"1180","venta":"1200",
         "fechaActualizacion":"2024-10-18T15:05:00-03:00"}
    ]"#;

    fn source(url: &str, timeout_ms: u64) -> HttpQuoteSource {
        // локальный тестовый сервер не должен уходить в системный прокси
        let builder = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .no_proxy();
        HttpQuoteSource::with_builder(url, builder).unwrap()
    }

    #[test]
    fn fetches_and_parses_snapshot() {
        let (url, server) = serve_once("200 OK", &[], BODY, Duration::ZERO);

        let quotes = source(&format!("{url}/v1/dolares"), 2_000).fetch().unwrap();
        let req = server.join().unwrap();

        assert_eq!(req.request_line, "GET /v1/dolares HTTP/1.1");
        assert_eq!(req.header("user-agent"), Some(config::USER_AGENT));
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].id, "USD:oficial");
        assert_eq!(quotes[0].buy, dec!(905.5));
        assert_eq!(quotes[1].display_name, "Blue");
        assert_eq!(quotes[1].sell, dec!(1200));
    }

    #[test]
    fn http_error_maps_to_upstream_error() {
        let (url, server) = serve_once("503 Service Unavailable", &[], "{}", Duration::ZERO);

        let err = source(&url, 2_000).fetch().unwrap_err();
        server.join().unwrap();

        assert_eq!(err, FetchError::UpstreamError { status: 503 });
    }

    #[test]
    fn bad_payload_is_malformed() {
        let (url, server) = serve_once("200 OK", &[], r#"{"error":"oops"}"#, Duration::ZERO);

        let err = source(&url, 2_000).fetch().unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, FetchError::MalformedResponse(_)), "{err:?}");
    }

    #[test]
    fn refused_connection_is_unreachable() {
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };

        let err = source(&format!("http://{addr}"), 2_000).fetch().unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)), "{err:?}");
    }

    #[test]
    fn slow_source_times_out() {
        let (url, _server) = serve_once("200 OK", &[], BODY, Duration::from_millis(800));

        let err = source(&url, 150).fetch().unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)), "{err:?}");
    }
}
