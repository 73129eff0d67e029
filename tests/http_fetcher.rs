use std::{net::TcpListener, time::Duration};

use flagkit::{Error, FetchResponse, Fetcher, HttpFetcher, HttpFetcherConfig};
use tokio::runtime::Runtime;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, Request, ResponseTemplate,
};

const FEATURES: &str = r#"{"version": 2, "features": []}"#;

/// The mock server answers on its own thread; fetches run on the test thread.
fn start_server() -> (Runtime, MockServer) {
    let runtime = Runtime::new().unwrap();
    let server = runtime.block_on(MockServer::start());
    (runtime, server)
}

fn received(runtime: &Runtime, server: &MockServer) -> Vec<Request> {
    runtime
        .block_on(server.received_requests())
        .unwrap_or_default()
}

fn header_of<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
}

fn fetcher_config(api_url: String) -> HttpFetcherConfig {
    HttpFetcherConfig {
        api_url,
        app_name: "http-tests".to_owned(),
        instance_id: "instance-1".to_owned(),
        api_key: Some("secret".to_owned()),
        project_name: None,
        name_prefix: None,
        custom_headers: vec![("x-team".to_owned(), "payments".to_owned())],
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(5),
    }
}

#[test]
fn conditional_fetch() {
    let (runtime, server) = start_server();
    runtime.block_on(async {
        Mock::given(method("GET"))
            .and(path("/api/client/features"))
            .and(header("if-none-match", "\"abc\""))
            .respond_with(ResponseTemplate::new(304))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/client/features"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"abc\"")
                    .set_body_string(FEATURES),
            )
            .up_to_n_times(1)
            .with_priority(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .with_priority(3)
            .mount(&server)
            .await;
    });

    let mut fetcher = HttpFetcher::new(&fetcher_config(format!("{}/api/", server.uri()))).unwrap();
    assert_eq!(fetcher.url().path(), "/api/client/features");

    assert_eq!(
        fetcher.fetch(None).unwrap(),
        FetchResponse::Changed {
            payload: FEATURES.to_owned(),
            etag: Some("\"abc\"".to_owned()),
        }
    );
    assert_eq!(
        fetcher.fetch(Some("\"abc\"")).unwrap(),
        FetchResponse::NotChanged
    );
    assert_eq!(
        fetcher.fetch(Some("\"abc\"")).unwrap(),
        FetchResponse::Unavailable { status: 503 }
    );

    let requests = received(&runtime, &server);
    assert_eq!(requests.len(), 3);
    let first = &requests[0];
    assert_eq!(header_of(first, "unleash-appname"), Some("http-tests"));
    assert_eq!(header_of(first, "unleash-instanceid"), Some("instance-1"));
    assert_eq!(header_of(first, "authorization"), Some("secret"));
    assert_eq!(header_of(first, "accept"), Some("application/json"));
    assert_eq!(header_of(first, "x-team"), Some("payments"));
    assert_eq!(header_of(first, "if-none-match"), None);
    assert_eq!(header_of(&requests[1], "if-none-match"), Some("\"abc\""));
}

#[test]
fn project_and_prefix_are_sent_as_query() {
    let (runtime, server) = start_server();
    runtime.block_on(
        Mock::given(method("GET"))
            .and(path("/client/features"))
            .and(query_param("project", "checkout"))
            .and(query_param("namePrefix", "checkout."))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server),
    );
    let mut config = fetcher_config(server.uri());
    config.project_name = Some("checkout".to_owned());
    config.name_prefix = Some("checkout.".to_owned());
    let mut fetcher = HttpFetcher::new(&config).unwrap();

    assert!(matches!(
        fetcher.fetch(None).unwrap(),
        FetchResponse::Changed { etag: None, .. }
    ));
    runtime.block_on(server.verify());
}

#[test]
fn redirects_are_followed() {
    let (runtime, server) = start_server();
    runtime.block_on(async {
        Mock::given(method("GET"))
            .and(path("/api/client/features"))
            .respond_with(
                ResponseTemplate::new(307).insert_header("location", "/moved/client/features"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/moved/client/features"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEATURES))
            .mount(&server)
            .await;
    });
    let mut fetcher = HttpFetcher::new(&fetcher_config(format!("{}/api", server.uri()))).unwrap();

    assert!(matches!(
        fetcher.fetch(None).unwrap(),
        FetchResponse::Changed { payload, .. } if payload == FEATURES
    ));
}

#[test]
fn error_statuses_carry_no_definitions() {
    for status in [400u16, 401, 403, 404, 429, 500, 502] {
        let (runtime, server) = start_server();
        runtime.block_on(
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server),
        );
        let mut fetcher = HttpFetcher::new(&fetcher_config(server.uri())).unwrap();

        assert_eq!(
            fetcher.fetch(None).unwrap(),
            FetchResponse::Unavailable { status },
            "status {status}"
        );
    }
}

#[test]
fn connection_refused_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut fetcher = HttpFetcher::new(&fetcher_config(address)).unwrap();
    assert!(matches!(fetcher.fetch(None), Err(Error::Network(_))));
}
