//! End-to-end tests driving the full service: worker thread, policy
//! staging, libcurl transport, reply pump.  Each test brings the
//! service up against a loopback HTTP server and tears it down; a
//! process-wide lock serializes them because the service is a
//! process-wide singleton.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use quarry_core::{
    resolve, HeaderList, HttpHandle, HttpHandler, HttpOptions, HttpRequest, HttpResponse,
    HttpStatus, LibraryError, OpStage, OptionValue, PolicyOption, ResponseRange,
    DEFAULT_POLICY_ID, GLOBAL_POLICY_ID, INVALID_HANDLE,
};

static SERIAL: Mutex<()> = Mutex::new(());

fn serial_guard() -> std::sync::MutexGuard<'static, ()> {
    match SERIAL.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ---- loopback server scaffolding ----

/// Accept up to `conns` connections, handing each to the closure with
/// its index.  Returns the base URL.
fn spawn_server<F>(conns: usize, mut handler: F) -> String
where
    F: FnMut(usize, TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for index in 0..conns {
            match listener.accept() {
                Ok((stream, _)) => handler(index, stream),
                Err(_) => break,
            }
        }
    });
    format!("http://{}", addr)
}

/// Read one request: header block plus any Content-Length body.
fn read_request(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
    let head_text = String::from_utf8_lossy(&head).to_string();
    let content_length = head_text
        .lines()
        .find_map(|line| {
            line.to_ascii_lowercase()
                .strip_prefix("content-length:")
                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
        })
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        let _ = stream.read_exact(&mut body);
    }
    (head_text, body)
}

fn respond(stream: &mut TcpStream, status_line: &str, extra_headers: &[(&str, String)], body: &[u8]) {
    let mut out = format!("HTTP/1.1 {}\r\n", status_line);
    for (name, value) in extra_headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));
    let _ = stream.write_all(out.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}

/// A port that refuses connections: bound, resolved, then released.
fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/nothing/here", addr)
}

// ---- completion recording ----

struct Completion {
    handle: HttpHandle,
    status: HttpStatus,
    body: Option<Vec<u8>>,
    retries: (u32, u32),
    range: Option<ResponseRange>,
    headers: Option<Vec<(String, String)>>,
    content_type: String,
    option_value: Option<OptionValue>,
}

#[derive(Default)]
struct Recorder {
    completions: Mutex<Vec<Completion>>,
}

impl Recorder {
    fn new() -> Arc<Recorder> {
        Arc::new(Recorder::default())
    }

    fn count(&self) -> usize {
        self.completions.lock().unwrap().len()
    }

    fn take(&self) -> Vec<Completion> {
        std::mem::take(&mut *self.completions.lock().unwrap())
    }

    fn find(&self, handle: HttpHandle) -> Option<HttpStatus> {
        self.completions
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.handle == handle)
            .map(|c| c.status.clone())
    }
}

impl HttpHandler for Recorder {
    fn on_completed(&self, handle: HttpHandle, response: &mut HttpResponse) {
        let completion = Completion {
            handle,
            status: response.status().clone(),
            body: response.take_body().map(|b| b.to_vec()),
            retries: response.retries(),
            range: response.range(),
            headers: response
                .take_headers()
                .map(|h| h.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect()),
            content_type: response.content_type().to_string(),
            option_value: response.option_value().cloned(),
        };
        self.completions.lock().unwrap().push(completion);
    }
}

/// Pump the reply queue until `count` completions arrive or `timeout`
/// elapses.  Returns whether the count was reached.
fn pump_until(request: &mut HttpRequest, recorder: &Recorder, count: usize, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        request.update(0);
        if recorder.count() >= count {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn start_service() {
    HttpRequest::create_service().expect("create service");
    HttpRequest::start_thread().expect("start thread");
}

fn stop_service(request: &mut HttpRequest) {
    request.request_stop_thread(None);
    let deadline = Instant::now() + Duration::from_secs(10);
    while !quarry_core::is_stopped() && Instant::now() < deadline {
        request.update(0);
        thread::sleep(Duration::from_millis(5));
    }
    // Drain any late replies so their handles die before teardown.
    request.update(0);
    HttpRequest::destroy_service().expect("destroy service");
}

// ---- scenarios ----

#[test]
fn noop_loopback() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();
    let handle = request.request_no_op(Some(recorder.clone()));
    assert_ne!(handle, INVALID_HANDLE);

    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(1)));
    let completions = recorder.take();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].handle, handle);
    assert!(completions[0].status.is_success());

    // The handle resolves to nothing once the handler has run.
    assert_eq!(resolve(handle), None);

    stop_service(&mut request);
}

#[test]
fn get_delivers_body_headers_and_content_type() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let url = spawn_server(1, |_, mut stream| {
        let (head, _) = read_request(&mut stream);
        assert!(head.starts_with("GET /asset "), "head: {}", head);
        // The library's default headers ride along.
        assert!(head.to_ascii_lowercase().contains("connection: keep-alive"));
        respond(
            &mut stream,
            "200 OK",
            &[("Content-Type", "text/plain".into())],
            b"hello world",
        );
    });

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();
    let options = Arc::new(HttpOptions {
        want_headers: true,
        ..HttpOptions::default()
    });
    let mut headers = HeaderList::new();
    headers.append("X-Asset-Kind", "texture");
    let handle = request.request_get(
        DEFAULT_POLICY_ID,
        0,
        &format!("{}/asset", url),
        Some(options),
        Some(Arc::new(headers)),
        Some(recorder.clone()),
    );
    assert_ne!(handle, INVALID_HANDLE);

    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(5)));
    let completions = recorder.take();
    let c = &completions[0];
    assert_eq!(c.status, HttpStatus::from_http(200));
    assert_eq!(c.body.as_deref(), Some(b"hello world".as_ref()));
    assert_eq!(c.content_type, "text/plain");
    let saved = c.headers.as_ref().expect("headers saved");
    assert!(saved
        .iter()
        .any(|(n, v)| n == "content-type" && v == "text/plain"));
    assert_eq!(c.retries, (0, 0));

    stop_service(&mut request);
}

#[test]
fn byte_range_get_reports_range_triple() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let url = spawn_server(1, |_, mut stream| {
        let (head, _) = read_request(&mut stream);
        assert!(
            head.to_ascii_lowercase().contains("range: bytes=0-24"),
            "head: {}",
            head
        );
        respond(
            &mut stream,
            "206 Partial Content",
            &[("Content-Range", "bytes 0-24/100".into())],
            &[0x41u8; 25],
        );
    });

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();
    let handle = request.request_get_byte_range(
        DEFAULT_POLICY_ID,
        0,
        &format!("{}/blob", url),
        0,
        25,
        None,
        None,
        Some(recorder.clone()),
    );
    assert_ne!(handle, INVALID_HANDLE);

    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(5)));
    let completions = recorder.take();
    let c = &completions[0];
    assert_eq!(c.status, HttpStatus::from_http(206));
    assert_eq!(
        c.range,
        Some(ResponseRange {
            offset: 0,
            length: 25,
            full_length: 100
        })
    );
    assert_eq!(c.body.as_ref().map(|b| b.len()), Some(25));

    stop_service(&mut request);
}

#[test]
fn content_range_disagreement_is_an_error() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let url = spawn_server(1, |_, mut stream| {
        let _ = read_request(&mut stream);
        // Claim 25 bytes, deliver 10.
        respond(
            &mut stream,
            "206 Partial Content",
            &[("Content-Range", "bytes 0-24/100".into())],
            &[0x42u8; 10],
        );
    });

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();
    let options = Arc::new(HttpOptions {
        retries: 0,
        ..HttpOptions::default()
    });
    let handle = request.request_get_byte_range(
        DEFAULT_POLICY_ID,
        0,
        &format!("{}/blob", url),
        0,
        25,
        Some(options),
        None,
        Some(recorder.clone()),
    );
    assert_ne!(handle, INVALID_HANDLE);

    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(5)));
    let completions = recorder.take();
    assert_eq!(
        completions[0].status,
        HttpStatus::library(LibraryError::InvContentRangeHdr)
    );

    stop_service(&mut request);
}

#[test]
fn connect_failure_retries_then_reports() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();
    let options = Arc::new(HttpOptions {
        retries: 1,
        min_backoff: 200_000,
        max_backoff: 400_000,
        timeout: 5,
        ..HttpOptions::default()
    });
    let handle = request.request_get(
        DEFAULT_POLICY_ID,
        0,
        &dead_url(),
        Some(options),
        None,
        Some(recorder.clone()),
    );
    assert_ne!(handle, INVALID_HANDLE);

    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(30)));
    let completions = recorder.take();
    let c = &completions[0];
    assert_eq!(c.status, HttpStatus::easy(curl_sys::CURLE_COULDNT_CONNECT));
    // Original attempt plus exactly one retry.
    assert_eq!(c.retries, (1, 0));

    stop_service(&mut request);
}

#[test]
fn retry_after_503_then_succeeds() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let url = spawn_server(2, |index, mut stream| {
        let _ = read_request(&mut stream);
        if index == 0 {
            respond(
                &mut stream,
                "503 Service Unavailable",
                &[("Retry-After", "1".into())],
                b"busy",
            );
        } else {
            respond(&mut stream, "200 OK", &[], b"finally");
        }
    });

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();
    let options = Arc::new(HttpOptions {
        retries: 2,
        use_retry_after: true,
        ..HttpOptions::default()
    });
    let started = Instant::now();
    let handle = request.request_get(
        DEFAULT_POLICY_ID,
        0,
        &format!("{}/flaky", url),
        Some(options),
        None,
        Some(recorder.clone()),
    );
    assert_ne!(handle, INVALID_HANDLE);

    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(20)));
    let elapsed = started.elapsed();
    let completions = recorder.take();
    let c = &completions[0];
    assert_eq!(c.status, HttpStatus::from_http(200));
    assert_eq!(c.body.as_deref(), Some(b"finally".as_ref()));
    // One retry, and it was a 503.
    assert_eq!(c.retries, (1, 1));
    // The server's Retry-After governed the schedule.
    assert!(elapsed >= Duration::from_millis(900), "elapsed {:?}", elapsed);

    stop_service(&mut request);
}

#[test]
fn cancel_in_flight_delivers_both_completions() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let url = spawn_server(1, move |_, mut stream| {
        let _ = read_request(&mut stream);
        // Hold the connection open until released or timed out.
        let _ = release_rx.recv_timeout(Duration::from_secs(20));
    });

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();
    let target = request.request_get(
        DEFAULT_POLICY_ID,
        0,
        &format!("{}/slow", url),
        None,
        None,
        Some(recorder.clone()),
    );
    assert_ne!(target, INVALID_HANDLE);

    // Wait for the worker to move the request into the transport.
    let deadline = Instant::now() + Duration::from_secs(5);
    while resolve(target) != Some(OpStage::Active) && Instant::now() < deadline {
        request.update(0);
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(resolve(target), Some(OpStage::Active));

    let cancel = request.request_cancel(target, Some(recorder.clone()));
    assert_ne!(cancel, INVALID_HANDLE);

    assert!(pump_until(&mut request, &recorder, 2, Duration::from_secs(5)));
    assert_eq!(
        recorder.find(target),
        Some(HttpStatus::library(LibraryError::OpCanceled))
    );
    assert_eq!(recorder.find(cancel), Some(HttpStatus::success()));

    drop(release_tx);
    stop_service(&mut request);
}

#[test]
fn cancel_of_unknown_handle_reports_not_found() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();
    // A noop's handle is dead as soon as its completion is delivered.
    let stale = request.request_no_op(Some(recorder.clone()));
    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(2)));
    recorder.take();

    let cancel = request.request_cancel(stale, Some(recorder.clone()));
    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(2)));
    assert_eq!(
        recorder.find(cancel),
        Some(HttpStatus::library(LibraryError::HandleNotFound))
    );

    stop_service(&mut request);
}

#[test]
fn post_and_put_bodies_upload() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let url = spawn_server(2, |_, mut stream| {
        let (_, body) = read_request(&mut stream);
        respond(&mut stream, "200 OK", &[], &body);
    });

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();

    let post_body = Arc::new(quarry_core::BufferArray::from_bytes(b"payload-of-post"));
    let post = request.request_post(
        DEFAULT_POLICY_ID,
        0,
        &format!("{}/submit", url),
        post_body,
        None,
        None,
        Some(recorder.clone()),
    );
    assert_ne!(post, INVALID_HANDLE);
    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(5)));

    let put_body = Arc::new(quarry_core::BufferArray::from_bytes(b"payload-of-put"));
    let put = request.request_put(
        DEFAULT_POLICY_ID,
        0,
        &format!("{}/store", url),
        put_body,
        None,
        None,
        Some(recorder.clone()),
    );
    assert_ne!(put, INVALID_HANDLE);
    assert!(pump_until(&mut request, &recorder, 2, Duration::from_secs(5)));

    let completions = recorder.take();
    let post_done = completions.iter().find(|c| c.handle == post).unwrap();
    assert_eq!(post_done.status, HttpStatus::from_http(200));
    assert_eq!(post_done.body.as_deref(), Some(b"payload-of-post".as_ref()));
    let put_done = completions.iter().find(|c| c.handle == put).unwrap();
    assert_eq!(put_done.status, HttpStatus::from_http(200));
    assert_eq!(put_done.body.as_deref(), Some(b"payload-of-put".as_ref()));

    stop_service(&mut request);
}

#[test]
fn stop_thread_cancels_queued_requests() {
    let _guard = serial_guard();
    init_logging();

    HttpRequest::create_service().expect("create service");
    // One connection at a time so extra requests pool on the ready queue.
    HttpRequest::set_static_policy_option(PolicyOption::ConnectionLimit, DEFAULT_POLICY_ID, 1)
        .expect("set limit");
    HttpRequest::start_thread().expect("start thread");

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let url = spawn_server(1, move |_, mut stream| {
        let _ = read_request(&mut stream);
        let _ = release_rx.recv_timeout(Duration::from_secs(20));
    });

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();
    let mut handles = Vec::new();
    for index in 0..3 {
        let handle = request.request_get(
            DEFAULT_POLICY_ID,
            0,
            &format!("{}/queued/{}", url, index),
            None,
            None,
            Some(recorder.clone()),
        );
        assert_ne!(handle, INVALID_HANDLE);
        handles.push(handle);
    }

    // Let the first request occupy the single slot.
    thread::sleep(Duration::from_millis(300));

    let stop = request.request_stop_thread(Some(recorder.clone()));
    assert_ne!(stop, INVALID_HANDLE);

    // All three requests die canceled, the stop op completes.
    assert!(pump_until(&mut request, &recorder, 4, Duration::from_secs(10)));
    for handle in &handles {
        assert_eq!(
            recorder.find(*handle),
            Some(HttpStatus::library(LibraryError::OpCanceled))
        );
    }
    assert_eq!(recorder.find(stop), Some(HttpStatus::success()));

    // The queue rejects further work once stopped.
    let rejected = request.request_no_op(None);
    assert_eq!(rejected, INVALID_HANDLE);
    assert_eq!(
        request.get_status(),
        HttpStatus::library(LibraryError::ShuttingDown)
    );

    drop(release_tx);
    HttpRequest::destroy_service().expect("destroy service");
}

#[test]
fn dynamic_options_set_get_and_refuse_static() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();

    let set = request.set_policy_option(
        PolicyOption::ThrottleRate,
        DEFAULT_POLICY_ID,
        OptionValue::Long(5),
        Some(recorder.clone()),
    );
    assert_ne!(set, INVALID_HANDLE);
    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(2)));
    let completions = recorder.take();
    let set_done = &completions[0];
    assert!(set_done.status.is_success());
    assert_eq!(set_done.option_value, Some(OptionValue::Long(5)));

    let get = request.get_policy_option(
        PolicyOption::ThrottleRate,
        DEFAULT_POLICY_ID,
        Some(recorder.clone()),
    );
    assert_ne!(get, INVALID_HANDLE);
    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(2)));
    let completions = recorder.take();
    let get_done = &completions[0];
    assert_eq!(get_done.option_value, Some(OptionValue::Long(5)));

    // CA file is init-phase only; the dynamic path refuses it.
    let refused = request.set_policy_option(
        PolicyOption::CaFile,
        GLOBAL_POLICY_ID,
        OptionValue::Str("/tmp/certs.pem".into()),
        Some(recorder.clone()),
    );
    assert_ne!(refused, INVALID_HANDLE);
    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(2)));
    assert_eq!(
        recorder.take()[0].status,
        HttpStatus::library(LibraryError::OptNotDynamic)
    );

    stop_service(&mut request);
}

#[test]
fn throttle_paces_promotions() {
    let _guard = serial_guard();
    init_logging();

    HttpRequest::create_service().expect("create service");
    HttpRequest::set_static_policy_option(PolicyOption::ThrottleRate, DEFAULT_POLICY_ID, 2)
        .expect("set throttle");
    HttpRequest::start_thread().expect("start thread");

    let url = spawn_server(5, |_, mut stream| {
        let _ = read_request(&mut stream);
        respond(&mut stream, "200 OK", &[], b"ok");
    });

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();
    let started = Instant::now();
    for index in 0..5 {
        let handle = request.request_get(
            DEFAULT_POLICY_ID,
            0,
            &format!("{}/tick/{}", url, index),
            None,
            None,
            Some(recorder.clone()),
        );
        assert_ne!(handle, INVALID_HANDLE);
    }

    assert!(pump_until(&mut request, &recorder, 5, Duration::from_secs(15)));
    let elapsed = started.elapsed();
    // Two per one-second window: five requests need at least two
    // window rollovers.
    assert!(elapsed >= Duration::from_millis(1800), "elapsed {:?}", elapsed);
    assert!(recorder.take().iter().all(|c| c.status.is_success()));

    stop_service(&mut request);
}

#[test]
fn reconfigure_stalls_staging_until_class_drains() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let url = spawn_server(3, move |index, mut stream| {
        let _ = read_request(&mut stream);
        if index == 0 {
            // First request holds its slot until released.
            let _ = release_rx.recv_timeout(Duration::from_secs(20));
        }
        respond(&mut stream, "200 OK", &[], b"drained");
    });

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();

    let slow = request.request_get(
        DEFAULT_POLICY_ID,
        0,
        &format!("{}/hold", url),
        None,
        None,
        Some(recorder.clone()),
    );
    let deadline = Instant::now() + Duration::from_secs(5);
    while resolve(slow) != Some(OpStage::Active) && Instant::now() < deadline {
        request.update(0);
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(resolve(slow), Some(OpStage::Active));

    // Reconfigure pipelining while the class has an active request:
    // the set completes, but staging stalls until the class drains.
    let set = request.set_policy_option(
        PolicyOption::PipeliningDepth,
        DEFAULT_POLICY_ID,
        OptionValue::Long(4),
        Some(recorder.clone()),
    );
    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(2)));
    assert_eq!(recorder.find(set).as_ref(), Some(&HttpStatus::success()));

    let queued_a = request.request_get(
        DEFAULT_POLICY_ID,
        0,
        &format!("{}/after/1", url),
        None,
        None,
        Some(recorder.clone()),
    );
    let queued_b = request.request_get(
        DEFAULT_POLICY_ID,
        0,
        &format!("{}/after/2", url),
        None,
        None,
        Some(recorder.clone()),
    );

    // Stalled: the new requests stay on the ready queue.
    thread::sleep(Duration::from_millis(400));
    request.update(0);
    assert_eq!(resolve(queued_a), Some(OpStage::Ready));
    assert_eq!(resolve(queued_b), Some(OpStage::Ready));

    // Release the hold; the class drains, options apply, staging resumes.
    release_tx.send(()).unwrap();
    assert!(pump_until(&mut request, &recorder, 4, Duration::from_secs(10)));
    for handle in [slow, queued_a, queued_b] {
        assert_eq!(recorder.find(handle), Some(HttpStatus::from_http(200)));
    }

    stop_service(&mut request);
}

#[test]
fn unknown_policy_class_is_rejected_at_submit() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let mut request = HttpRequest::new();
    let handle = request.request_get(99, 0, "http://127.0.0.1:1/x", None, None, None);
    assert_eq!(handle, INVALID_HANDLE);
    assert_eq!(
        request.get_status(),
        HttpStatus::library(LibraryError::InvalidArg)
    );

    stop_service(&mut request);
}

#[test]
fn set_priority_of_missing_request_reports_not_found() {
    let _guard = serial_guard();
    init_logging();
    start_service();

    let recorder = Recorder::new();
    let mut request = HttpRequest::new();
    let op = request.request_set_priority(
        HttpHandle::default(),
        7,
        Some(recorder.clone()),
    );
    assert_ne!(op, INVALID_HANDLE);
    assert!(pump_until(&mut request, &recorder, 1, Duration::from_secs(2)));
    assert_eq!(
        recorder.find(op),
        Some(HttpStatus::library(LibraryError::HandleNotFound))
    );

    stop_service(&mut request);
}
