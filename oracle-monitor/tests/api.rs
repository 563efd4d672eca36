use oracle_monitor::{
    MonitorError, SourceId,
    api::ApiClient,
    params::ParameterSet,
    sync::ParamsSink,
    types::CalculationMode,
};
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, method, path},
};

async fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(&server.uri(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_fetch_data_decodes_full_bundle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "seq": 42,
            "timestamp": "2025-03-01T09:00:00",
            "prices": {
                "upbit": {"price": 5_000_000, "spread": 0.02, "volume": "1200.5", "depth": null},
                "bithumb": 4_990_000,
                "usdt_krw": {"price": 1385.0}
            },
            "oracle_result": {
                "median_price": 4_995_000,
                "calculation_method": "inverse",
                "is_volatile": false,
                "price_details": [["upbit (manual)", 5_000_000]],
                "weights": {"upbit": 0.5, "bithumb": 0.5}
            },
            "price_history": {
                "timestamps": ["2025-03-01T08:59:59", "2025-03-01T09:00:00"],
                "upbit": [4_999_000, 5_000_000],
                "max_points": 100
            }
        })))
        .mount(&server)
        .await;

    let bundle = client(&server).await.fetch_data().await.unwrap();

    assert_eq!(bundle.seq, Some(42));
    assert!(bundle.timestamp.is_some());
    assert_eq!(bundle.price_of(&SourceId::from("upbit")), Some(5_000_000.0));
    assert_eq!(bundle.price_of(&SourceId::from("bithumb")), Some(4_990_000.0));
    assert_eq!(bundle.prices[&SourceId::from("upbit")].volume, Some(1200.5));

    let oracle = bundle.oracle_result.unwrap();
    assert_eq!(oracle.aggregate_price, Some(4_995_000.0));
    assert_eq!(oracle.calculation_mode, CalculationMode::Inverse);
    assert!(oracle.has_manual_detail_for(&SourceId::from("upbit")));

    let history = bundle.price_history.unwrap();
    assert_eq!(history.timestamps.len(), 2);
    assert_eq!(history.series.len(), 1);
}

#[tokio::test]
async fn test_asset_bundle_composes_per_asset_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/aggregated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ETH": {"price": 5_010_000, "weights": {"upbit": 0.6, "bithumb": 0.4}},
            "BTC": {"price": 140_000_000, "weights": {}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/prices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ETH": {
                "upbit": {"price": 5_020_000, "spread": 0.01, "volume": 10, "depth": 3},
                "bithumb": {"price": 5_000_000}
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/chart/ETH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"timestamp": "2025-03-01T09:00:00", "price": 5_000_000, "exchanges": {"upbit": 5_010_000}},
            {"timestamp": "2025-03-01T09:00:01", "price": 5_010_000, "exchanges": {"upbit": 5_020_000}}
        ])))
        .mount(&server)
        .await;

    let bundle = client(&server).await.fetch_asset_bundle("ETH").await.unwrap();

    assert_eq!(bundle.seq, None);
    assert_eq!(
        bundle.timestamp.unwrap().to_rfc3339(),
        "2025-03-01T09:00:01+00:00"
    );
    assert_eq!(bundle.price_of(&SourceId::from("upbit")), Some(5_020_000.0));
    let oracle = bundle.oracle_result.unwrap();
    assert_eq!(oracle.aggregate_price, Some(5_010_000.0));
    assert_eq!(oracle.weights[&SourceId::from("upbit")], 0.6);
    assert_eq!(bundle.price_history.unwrap().timestamps.len(), 2);
}

#[tokio::test]
async fn test_manual_override_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/usdt-krw/manual"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"manual_price": 1390.5})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/usdt-krw/manual"))
        .and(body_json(json!({"price": null})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/oracle/update"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).await;

    assert_eq!(client.get_manual("/api/usdt-krw/manual").await.unwrap(), Some(1390.5));
    client.set_manual("/api/usdt-krw/manual", None).await.unwrap();
    client.request_update().await.unwrap();
}

#[tokio::test]
async fn test_params_push_sends_full_set() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/params"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let params = ParameterSet::defaults(&[SourceId::from("upbit"), SourceId::from("bithumb")]);
    client(&server).await.push_params(&params).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    for field in ["exchange_weights", "spread_weights", "volume_weights", "depth_weights"] {
        assert_eq!(body[field]["upbit"], json!(1.0), "{field}");
    }
    assert_eq!(body["aggregation_method"], json!("average"));
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/data"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let error = client(&server).await.fetch_data().await.unwrap_err();

    assert_eq!(
        error,
        MonitorError::Status {
            endpoint: "/api/data".to_string(),
            status: 503
        }
    );
    assert!(!error.is_disconnect());
}
