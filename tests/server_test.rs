//! End-to-end tests over the HTTP surface
//!
//! Each test stands up the full route table against an in-memory service,
//! speaking the real wire format through `actix_web::test`.

use actix_web::{test, web, App};
use modelpipe::client::{encode_infer_request, encode_metadata_request, parse_infer_response};
use modelpipe::{
    api, build_simple_apply, from_value, wire, AppContext, Applier, Metadata, RequestContext,
    Result, ResultCache, ServeOptions, Tensor,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Build the handler state the way `serve_raw` does, without binding a port
fn app_data(opts: ServeOptions) -> web::Data<AppContext> {
    let cache = opts
        .cache_file
        .as_ref()
        .map(|path| Arc::new(ResultCache::open(path).unwrap()));
    web::Data::from(Arc::new(AppContext {
        meta: opts.meta,
        apply: opts.apply,
        get_handler: opts.get_handler,
        rest_apply: opts.rest_apply,
        default_inputs: opts.default_inputs,
        default_outputs: opts.default_outputs,
        cache,
        is_ready: AtomicI64::new(1),
        is_alive: AtomicI64::new(1),
    }))
}

fn identity_applier() -> Applier {
    Arc::new(|_ctx, _config, mut inputs, _output_names| {
        let mut names: Vec<String> = inputs.keys().cloned().collect();
        names.sort();
        Ok(names.iter().filter_map(|name| inputs.remove(name)).collect())
    })
}

fn identity_options() -> ServeOptions {
    ServeOptions {
        default_inputs: vec!["input0".to_owned()],
        default_outputs: vec!["output0".to_owned()],
        apply: identity_applier(),
        meta: Metadata {
            name: "identity".to_owned(),
            ..Default::default()
        },
        ..Default::default()
    }
}

macro_rules! service {
    ($data:expr) => {
        test::init_service(
            App::new()
                .app_data($data.clone())
                .configure(api::routes::configure),
        )
        .await
    };
}

async fn post_binary<S, B>(app: &S, body: Vec<u8>) -> (u16, Vec<u8>)
where
    S: actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    B: actix_web::body::MessageBody,
{
    let req = test::TestRequest::post()
        .uri("/")
        .set_payload(body)
        .to_request();
    let resp = test::call_service(app, req).await;
    let status = resp.status().as_u16();
    let body = test::read_body(resp).await;
    (status, body.to_vec())
}

#[actix_web::test]
async fn test_echo_int64() {
    let data = app_data(identity_options());
    let app = service!(data);

    let input = Tensor::from_bytes(
        [2i64, 2].iter().flat_map(|v| v.to_le_bytes()).collect(),
        vec![2],
        modelpipe::ElementType::Int64,
    )
    .unwrap();
    let request = encode_infer_request("", &[input.clone()], &[], &["output0".to_owned()]);
    let (status, body) = post_binary(&app, request).await;
    assert_eq!(status, 200);
    let outputs = parse_infer_response(&body).unwrap();
    assert_eq!(outputs, vec![input]);
}

#[actix_web::test]
async fn test_echo_strings() {
    let data = app_data(identity_options());
    let app = service!(data);

    let input = from_value(&vec!["foo".to_string(), "bar".to_string(), "baz".to_string()]).unwrap();
    let request = encode_infer_request("", &[input.clone()], &[], &[]);
    let (status, body) = post_binary(&app, request).await;
    assert_eq!(status, 200);
    let outputs = parse_infer_response(&body).unwrap();
    assert_eq!(outputs, vec![input]);
}

#[actix_web::test]
async fn test_declared_shape_mismatch_is_400() {
    let opts = build_simple_apply(
        |_ctx: &mut RequestContext, _cfg: String, (x,): (Vec<Vec<f32>>,)| Ok((x,)),
        Some(vec![vec![-1, 3]]),
        None,
    );
    let data = app_data(opts);
    let app = service!(data);

    let bad = from_value(&vec![vec![1.0f32, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]).unwrap();
    let request = encode_infer_request("", &[bad], &[], &[]);
    let (status, body) = post_binary(&app, request).await;
    assert_eq!(status, 400);
    assert!(String::from_utf8_lossy(&body).contains("shape"));
}

#[actix_web::test]
async fn test_cache_counts_only_new_rows() {
    let dir = TempDir::new().unwrap();
    let rows_seen = Arc::new(AtomicUsize::new(0));
    let seen = rows_seen.clone();
    let apply: Applier = Arc::new(move |_ctx, _config, inputs, _output_names| {
        let input = inputs["input0"].clone();
        seen.fetch_add(input.shape()[0] as usize, Ordering::SeqCst);
        Ok(vec![input])
    });
    let opts = ServeOptions {
        cache_file: Some(dir.path().join("cache.db")),
        default_inputs: vec!["input0".to_owned()],
        default_outputs: vec!["output0".to_owned()],
        apply,
        ..Default::default()
    };
    let data = app_data(opts);
    let app = service!(data);

    let first = from_value(&vec![vec![1.0f32, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]).unwrap();
    let (status, _) = post_binary(&app, encode_infer_request("", &[first], &[], &[])).await;
    assert_eq!(status, 200);
    assert_eq!(rows_seen.load(Ordering::SeqCst), 2);

    // let the detached write-back land before the second request
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second =
        from_value(&vec![vec![5.0f32, 6.0, 7.0, 8.0], vec![9.0, 10.0, 11.0, 12.0]]).unwrap();
    let (status, body) = post_binary(&app, encode_infer_request("", &[second.clone()], &[], &[])).await;
    assert_eq!(status, 200);
    assert_eq!(rows_seen.load(Ordering::SeqCst), 3, "one new row computed");
    assert_eq!(parse_infer_response(&body).unwrap(), vec![second]);
}

#[actix_web::test]
async fn test_interleaved_cache_reassembles() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let apply: Applier = Arc::new(move |_ctx, _config, inputs, _output_names| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(vec![inputs["input0"].clone()])
    });
    let opts = ServeOptions {
        cache_file: Some(dir.path().join("cache.db")),
        default_inputs: vec!["input0".to_owned()],
        default_outputs: vec!["output0".to_owned()],
        apply,
        ..Default::default()
    };
    let data = app_data(opts);
    let app = service!(data);

    let row = |v: f32| vec![v, v + 1.0];
    let rb = from_value(&vec![row(10.0)]).unwrap();
    post_binary(&app, encode_infer_request("", &[rb], &[], &[])).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let concat = from_value(&vec![row(0.0), row(10.0), row(20.0)]).unwrap();
    let (status, body) =
        post_binary(&app, encode_infer_request("", &[concat.clone()], &[], &[])).await;
    assert_eq!(status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(parse_infer_response(&body).unwrap(), vec![concat]);
}

#[actix_web::test]
async fn test_panic_containment() {
    let opts = build_simple_apply(
        |_ctx: &mut RequestContext, _cfg: String, (_x,): (Vec<f32>,)| -> Result<(Vec<f32>,)> {
            panic!("model exploded")
        },
        None,
        None,
    );
    let data = app_data(opts);
    let app = service!(data);

    let input = from_value(&vec![1.0f32]).unwrap();
    let (status, body) = post_binary(&app, encode_infer_request("", &[input], &[], &[])).await;
    assert_eq!(status, 400);
    assert!(String::from_utf8_lossy(&body).contains("apply"));

    // the server survives
    let req = test::TestRequest::get().uri("/control/is_alive").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(test::read_body(resp).await, web::Bytes::from("ok\n"));
}

#[actix_web::test]
async fn test_metadata_request() {
    let data = app_data(identity_options());
    let app = service!(data);

    let (status, body) = post_binary(&app, encode_metadata_request()).await;
    assert_eq!(status, 200);
    let meta = Metadata::from_wire(wire::root_as_metadata_response(&body).unwrap());
    assert_eq!(meta.name, "identity");
}

#[actix_web::test]
async fn test_undecodable_body_is_400() {
    let data = app_data(identity_options());
    let app = service!(data);
    let (status, _) = post_binary(&app, vec![0xff, 0x01, 0x02]).await;
    assert_eq!(status, 400);
}

#[actix_web::test]
async fn test_unhandled_get_is_500() {
    let data = app_data(identity_options());
    let app = service!(data);
    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 500);
    assert_eq!(test::read_body(resp).await, web::Bytes::from("Unhandled GET"));
}

#[actix_web::test]
async fn test_typed_shim_get_serves_metadata_json() {
    let opts = build_simple_apply(
        |_ctx: &mut RequestContext, _cfg: String, (x,): (Vec<f32>,)| Ok((x,)),
        None,
        None,
    );
    let data = app_data(opts);
    let app = service!(data);
    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["inputs"][0]["name"], "input0");
}

#[actix_web::test]
async fn test_lifecycle_endpoints() {
    let data = app_data(identity_options());
    let app = service!(data);

    for uri in ["/control/is_ready", "/control/is_alive"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 200, "{uri}");
    }

    let req = test::TestRequest::get().uri("/control/client_count").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.trim().parse::<i64>().is_ok());

    // not-ready flips the probe to 503
    data.is_ready.store(0, Ordering::SeqCst);
    let req = test::TestRequest::get().uri("/control/is_ready").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 503);
}

#[actix_web::test]
async fn test_unknown_route_is_404() {
    let data = app_data(identity_options());
    let app = service!(data);
    let req = test::TestRequest::get().uri("/no/such/place").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
}

#[actix_web::test]
async fn test_concurrent_requests_complete() {
    let data = app_data(identity_options());
    let app = Arc::new(service!(data));

    let mut tasks = Vec::new();
    for i in 0..16u8 {
        let app = Arc::clone(&app);
        tasks.push(async move {
            let input = from_value(&vec![vec![f32::from(i); 4]]).unwrap();
            let request = encode_infer_request("", &[input.clone()], &[], &[]);
            let (status, body) = post_binary(app.as_ref(), request).await;
            assert_eq!(status, 200);
            assert_eq!(parse_infer_response(&body).unwrap(), vec![input]);
        });
    }
    futures_util::future::join_all(tasks).await;
}

#[actix_web::test]
async fn test_client_disconnect_sets_has_died() {
    // an adapter that waits to observe its own cancellation
    let observed = Arc::new(AtomicBool::new(false));
    let saw = observed.clone();
    let apply: Applier = Arc::new(move |ctx, _config, inputs, _output_names| {
        for _ in 0..200 {
            if !ctx.is_alive() {
                saw.store(true, Ordering::SeqCst);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(vec![inputs["input0"].clone()])
    });
    let opts = ServeOptions {
        default_inputs: vec!["input0".to_owned()],
        default_outputs: vec!["output0".to_owned()],
        apply,
        ..Default::default()
    };
    let data = app_data(opts);

    let input = from_value(&vec![1.0f32]).unwrap();
    let body = web::Bytes::from(encode_infer_request("", &[input], &[], &[]));

    // drive the handler directly so the request future can be dropped
    // mid-flight, the way an actix worker drops it on client disconnect
    let handle = actix_web::rt::spawn(api::handlers::post_root(data, body));
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.abort();

    for _ in 0..200 {
        if observed.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("adapter never observed the cancellation flag");
}
