//! Collection, filtering and export of router metrics.

mod common;

use std::sync::Arc;
use std::time::Duration;

use federation_router::config::schema::{CustomAttributeConfig, ValueFromConfig};
use federation_router::pipeline::OperationRequest;
use federation_router::telemetry::attributes::keys;
use federation_router::telemetry::context::{RequestContext, SubgraphContext};
use federation_router::observability::metrics::prometheus_builder;
use federation_router::telemetry::model::{
    AttributeValue, ResourceMetrics, HTTP_REQUESTS, HTTP_REQUESTS_ERROR,
};
use federation_router::telemetry::{
    FlushReport, InMemoryExporter, MetricExporter, PeriodicReader, PrometheusExporter,
};
use federation_router::RouterInstance;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};

use common::{config, router, CountingEngine};

fn attribute(
    key: &str,
    value_from: ValueFromConfig,
    default: Option<&str>,
) -> CustomAttributeConfig {
    CustomAttributeConfig {
        key: key.into(),
        default: default.map(str::to_string),
        value_from: Some(value_from),
    }
}

fn header(name: &str) -> ValueFromConfig {
    ValueFromConfig {
        request_header: Some(name.into()),
        ..ValueFromConfig::default()
    }
}

fn context_field(name: &str) -> ValueFromConfig {
    ValueFromConfig {
        context_field: Some(name.into()),
        ..ValueFromConfig::default()
    }
}

fn expression(source: &str) -> ValueFromConfig {
    ValueFromConfig {
        expression: Some(source.into()),
        ..ValueFromConfig::default()
    }
}

fn run_query(router: &RouterInstance, query: &str) {
    let mut context = RequestContext::new("POST", "/graphql");
    router
        .execute_operation(&OperationRequest::query(query), &mut context, None)
        .unwrap();
}

fn export_into(recorder: &PrometheusRecorder, resource: &ResourceMetrics) {
    metrics::with_local_recorder(recorder, || PrometheusExporter::new().export(resource).unwrap());
}

#[test]
fn custom_attributes_resolve_in_order() {
    let mut config = config("1");
    config.telemetry.metrics.attributes = vec![
        attribute("tenant", header("x-tenant"), Some("unknown")),
        attribute("my_operation_hash", context_field("operation_hash"), None),
        attribute("outcome", expression("request.error != nil ? 'error' : 'success'"), None),
    ];
    let router = router(config, CountingEngine::new());

    let mut tagged = RequestContext::new("POST", "/graphql").with_header("X-Tenant", "acme");
    router
        .execute_operation(&OperationRequest::query("query A { a }"), &mut tagged, None)
        .unwrap();
    let mut untagged = RequestContext::new("POST", "/graphql");
    router
        .execute_operation(&OperationRequest::query("query A { a }"), &mut untagged, None)
        .unwrap();

    let resource = router.emitter().collect();
    let requests = resource.find(HTTP_REQUESTS).unwrap();
    let acme = requests.point(&[("tenant", "acme")]).unwrap();
    assert_eq!(acme.value, 1);
    assert!(acme.attribute("my_operation_hash").is_some());
    assert!(acme.attribute(keys::OPERATION_HASH).is_none());
    assert_eq!(acme.attribute("outcome"), Some(&AttributeValue::from("success")));
    assert_eq!(requests.point(&[("tenant", "unknown")]).unwrap().value, 1);
}

#[test]
fn subgraph_expressions_only_apply_to_fetches() {
    let mut config = config("1");
    config.telemetry.metrics.attributes = vec![attribute("sg", expression("subgraph.name"), None)];
    let router = router(config, CountingEngine::new());

    let mut ctx = RequestContext::new("POST", "/graphql");
    let prepared = router
        .execute_operation(&OperationRequest::query("{ employees { id } }"), &mut ctx, None)
        .unwrap();
    let mut fetch = SubgraphContext::new("employees", "0");
    fetch.error = Some("timeout".into());
    router.record_subgraph_fetch(&prepared, &ctx, &fetch);

    let resource = router.emitter().collect();
    let requests = resource.find(HTTP_REQUESTS).unwrap();
    assert_eq!(requests.data_points.len(), 2);
    assert!(requests.point(&[("sg", "employees"), (keys::SUBGRAPH_NAME, "employees")]).is_some());

    let errors = resource.find(HTTP_REQUESTS_ERROR).unwrap();
    assert_eq!(errors.data_points.len(), 1);
    assert_eq!(
        errors.data_points[0].attribute(keys::SUBGRAPH_NAME),
        Some(&AttributeValue::from("employees"))
    );
}

#[test]
fn client_name_exclusion_applies_everywhere() {
    let mut config = config("1");
    config.telemetry.metrics.exclude_metric_labels = vec![r"wg\.client\.name".into()];
    let router = router(config, CountingEngine::new());

    for client in ["web", "ios"] {
        let request = OperationRequest::query("{ a }").with_client(client, "2.0");
        router
            .execute_operation(&request, &mut RequestContext::new("POST", "/graphql"), None)
            .unwrap();
    }

    let resource = router.emitter().collect();
    assert!(resource.total_metrics() > 0);
    for metric in resource.metrics() {
        for point in &metric.data_points {
            assert!(
                point.attribute(keys::CLIENT_NAME).is_none(),
                "{} kept the client name",
                metric.name
            );
        }
    }
    let requests = resource.find(HTTP_REQUESTS).unwrap();
    assert_eq!(requests.data_points.len(), 1);
    assert_eq!(requests.data_points[0].value, 2);
    assert_eq!(
        requests.data_points[0].attribute(keys::CLIENT_VERSION),
        Some(&AttributeValue::from("2.0"))
    );
}

#[test]
fn metric_exclusion_drops_whole_series() {
    let mut config = config("1");
    config.telemetry.metrics.exclude_metrics = vec![r"^router\.graphql\.cache\.".into()];
    let router = router(config, CountingEngine::new());
    run_query(&router, "{ a }");

    let resource = router.emitter().collect();
    assert!(resource.metrics().all(|m| !m.name.starts_with("router.graphql.cache.")));
    assert!(resource.find(HTTP_REQUESTS).is_some());
}

#[test]
fn failed_export_keeps_accumulating() {
    let router = router(config("1"), CountingEngine::new());
    let sink = Arc::new(InMemoryExporter::new());
    let reader = PeriodicReader::new(router.emitter().clone(), Duration::from_secs(15))
        .with_exporter(sink.clone());
    let request = OperationRequest::query("{ a }");

    sink.set_failing(true);
    router
        .execute_operation(&request, &mut RequestContext::new("POST", "/graphql"), None)
        .unwrap();
    assert_eq!(reader.force_flush().failed, 1);

    sink.set_failing(false);
    router
        .execute_operation(&request, &mut RequestContext::new("POST", "/graphql"), None)
        .unwrap();
    assert_eq!(reader.force_flush().exported, 1);

    let exported = sink.last().unwrap();
    assert_eq!(exported.find(HTTP_REQUESTS).unwrap().data_points[0].value, 2);
}

#[test]
fn prometheus_scrape_shows_cache_series() {
    let router = router(config("1"), CountingEngine::new());
    run_query(&router, "{ a }");

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    export_into(&recorder, &router.emitter().collect());

    let rendered = handle.render();
    assert!(rendered.contains("router_graphql_cache_cost_max"));
    assert!(rendered.contains("cache_type=\"plan\""));
    assert!(rendered.contains("router_http_requests"));
}

#[test]
fn rotated_config_version_leaves_the_scrape() {
    let router = router(config("v1"), CountingEngine::new());
    run_query(&router, "{ a }");

    let recorder = prometheus_builder(Duration::from_millis(10)).build_recorder();
    let handle = recorder.handle();
    export_into(&recorder, &router.emitter().collect());
    assert!(handle.render().contains("wg_router_config_version=\"v1\""));

    router.apply_config(config("v2")).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    run_query(&router, "{ a }");
    export_into(&recorder, &router.emitter().collect());

    let rendered = handle.render();
    assert!(!rendered.contains("wg_router_config_version=\"v1\""), "{rendered}");
    assert!(rendered.contains("wg_router_config_version=\"v2\""));
}

#[test]
fn live_series_survive_the_idle_timeout() {
    let router = router(config("v1"), CountingEngine::new());
    run_query(&router, "{ a }");

    let recorder = prometheus_builder(Duration::from_millis(10)).build_recorder();
    let handle = recorder.handle();
    for _ in 0..3 {
        export_into(&recorder, &router.emitter().collect());
        handle.render();
        std::thread::sleep(Duration::from_millis(50));
        export_into(&recorder, &router.emitter().collect());
    }
    assert!(handle.render().contains("router_graphql_cache_cost_max"));
}

#[test]
fn reload_enabling_metrics_exports_cumulative_totals() {
    let mut disabled = config("1");
    disabled.telemetry.metrics.enabled = false;
    let router = router(disabled, CountingEngine::new());
    run_query(&router, "{ a }");
    run_query(&router, "{ a }");

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let report = metrics::with_local_recorder(&recorder, || router.reader().force_flush());
    assert_eq!(report, FlushReport::default());
    assert!(!handle.render().contains("router_graphql_cache"));

    let mut enabled = config("1");
    enabled.telemetry.metrics.prometheus.enabled = true;
    router.apply_config(enabled).unwrap();
    let report = metrics::with_local_recorder(&recorder, || router.reader().force_flush());
    assert_eq!(report.exported, 1);

    let rendered = handle.render();
    let plan_hits = rendered
        .lines()
        .find(|line| {
            line.starts_with("router_graphql_cache_requests_stats")
                && line.contains("cache_type=\"plan\"")
                && line.contains("type=\"hits\"")
        })
        .unwrap();
    assert!(plan_hits.ends_with(" 1"), "{plan_hits}");
}

#[test]
fn resource_carries_instance_identity() {
    let router = router(config("1"), CountingEngine::new());
    let resource = router.emitter().collect();
    assert_eq!(
        resource.resource.get("service.instance.id"),
        Some(&AttributeValue::from(router.emitter().instance_id().to_string()))
    );
}
