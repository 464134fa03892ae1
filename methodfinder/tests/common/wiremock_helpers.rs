use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use std::time::Duration;

/// HTML page whose head carries the translation script tag with the given attributes.
pub fn page_with_tag(primary: &str, info: Option<&str>) -> String {
    let info = info
        .map(|i| format!(" data-wovnio-info=\"{}\"", i))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html><html><head><title>t</title>\
         <script src=\"https://j.wovn.io/1\" data-wovnio=\"{}\"{} async></script>\
         </head><body>hello</body></html>",
        primary, info
    )
}

/// Serves `html` at `url_path` with a 200.
pub async fn mount_page(server: &MockServer, url_path: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html.to_string())
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

/// Answers `url_path` with `status` exactly `times` times, then falls through
/// to whatever is mounted after it.
pub async fn mount_failures(server: &MockServer, url_path: &str, status: u16, times: u64) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(status))
        .up_to_n_times(times)
        .with_priority(1)
        .mount(server)
        .await;
}

/// Creates a mock HTTP server that delays responses to simulate network timeouts.
pub async fn mock_timeout_server(delay_ms: u64) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .set_delay(Duration::from_millis(delay_ms)),
        )
        .mount(&server)
        .await;

    server
}

/// Mounts a JSON response that requires the edge API key header.
pub async fn mount_api_json(server: &MockServer, url_path: &str, api_key: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .and(header("Fastly-Key", api_key))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}
