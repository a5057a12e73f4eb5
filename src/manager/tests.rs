use super::*;
use crate::error::DownloadError;
use crate::middleware::{ExceptionHandler, RequestHandler, ResponseHandler, StageOutput};
use async_trait::async_trait;
use http::{HeaderValue, StatusCode};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

type Log = Arc<Mutex<Vec<String>>>;
type OnRequest = Box<dyn Fn(&mut Request) -> Result<StageOutput, Fault> + Send + Sync>;
type OnResponse = Box<dyn Fn(&Request, Response) -> Result<StageOutput, Fault> + Send + Sync>;
type OnException = Box<dyn Fn(&Request, &Fault) -> Result<StageOutput, Fault> + Send + Sync>;

struct Scripted {
    name: &'static str,
    log: Log,
    on_request: Option<OnRequest>,
    on_response: Option<OnResponse>,
    on_exception: Option<OnException>,
}

impl Scripted {
    fn new(name: &'static str, log: &Log) -> Self {
        Scripted {
            name,
            log: Arc::clone(log),
            on_request: None,
            on_response: None,
            on_exception: None,
        }
    }

    fn request(
        mut self,
        f: impl Fn(&mut Request) -> Result<StageOutput, Fault> + Send + Sync + 'static,
    ) -> Self {
        self.on_request = Some(Box::new(f));
        self
    }

    fn response(
        mut self,
        f: impl Fn(&Request, Response) -> Result<StageOutput, Fault> + Send + Sync + 'static,
    ) -> Self {
        self.on_response = Some(Box::new(f));
        self
    }

    fn exception(
        mut self,
        f: impl Fn(&Request, &Fault) -> Result<StageOutput, Fault> + Send + Sync + 'static,
    ) -> Self {
        self.on_exception = Some(Box::new(f));
        self
    }

    fn passthrough(name: &'static str, log: &Log) -> Self {
        Scripted::new(name, log)
            .request(|_| Ok(StageOutput::Continue))
            .response(|_, response| Ok(response.into()))
            .exception(|_, _| Ok(StageOutput::Continue))
    }

    fn record(&self, phase: &str) {
        self.log.lock().push(format!("{}:{}", self.name, phase));
    }
}

impl Middleware for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn request_handler(self: Arc<Self>) -> Option<Arc<dyn RequestHandler>> {
        self.on_request.is_some().then_some(self as Arc<dyn RequestHandler>)
    }

    fn response_handler(self: Arc<Self>) -> Option<Arc<dyn ResponseHandler>> {
        self.on_response.is_some().then_some(self as Arc<dyn ResponseHandler>)
    }

    fn exception_handler(self: Arc<Self>) -> Option<Arc<dyn ExceptionHandler>> {
        self.on_exception.is_some().then_some(self as Arc<dyn ExceptionHandler>)
    }
}

#[async_trait]
impl RequestHandler for Scripted {
    async fn process_request(&self, request: &mut Request) -> Result<StageOutput, Fault> {
        self.record("request");
        tokio::task::yield_now().await;
        (self.on_request.as_ref().unwrap())(request)
    }
}

#[async_trait]
impl ResponseHandler for Scripted {
    async fn process_response(
        &self,
        request: &Request,
        response: Response,
    ) -> Result<StageOutput, Fault> {
        self.record("response");
        tokio::task::yield_now().await;
        (self.on_response.as_ref().unwrap())(request, response)
    }
}

#[async_trait]
impl ExceptionHandler for Scripted {
    async fn process_exception(
        &self,
        request: &Request,
        fault: &Fault,
    ) -> Result<StageOutput, Fault> {
        self.record("exception");
        tokio::task::yield_now().await;
        (self.on_exception.as_ref().unwrap())(request, fault)
    }
}

#[derive(Default)]
struct MockDownloader {
    calls: AtomicUsize,
    seen: Mutex<Vec<Request>>,
    fail: bool,
    delay: Option<Duration>,
}

impl MockDownloader {
    fn failing() -> Self {
        MockDownloader {
            fail: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, request: Request) -> Result<Response, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(DownloadError::Connection("connection refused".into()));
        }
        Ok(Response::builder(request.url.clone())
            .body("downloaded body")
            .request(request)
            .build())
    }
}

fn url(path: &str) -> Url {
    Url::parse("https://example.com").unwrap().join(path).unwrap()
}

fn manager(middlewares: Vec<Scripted>) -> DownloaderMiddlewareManager {
    DownloaderMiddlewareManager::from_middlewares(
        middlewares
            .into_iter()
            .map(|m| Arc::new(m) as Arc<dyn Middleware>)
            .collect(),
    )
}

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

#[tokio::test]
async fn no_middlewares_downloads_original_request() {
    let manager = manager(Vec::new());
    let downloader = MockDownloader::default();
    let request = Request::new(url("/a")).with_priority(3);

    let output = manager.download(&downloader, request.clone()).await.unwrap();
    let response = output.into_response().unwrap();

    assert_eq!(downloader.calls(), 1);
    assert_eq!(downloader.seen.lock()[0], request);
    assert_eq!(manager.current_size(), response.body_len());
    assert_eq!(manager.tracked_responses(), 1);

    drop(response);
    assert_eq!(manager.current_size(), 0);
    assert_eq!(manager.tracked_responses(), 0);
}

#[tokio::test]
async fn handlers_run_in_nested_order() {
    let log = new_log();
    let manager = manager(vec![
        Scripted::passthrough("a", &log),
        Scripted::passthrough("b", &log),
        Scripted::passthrough("c", &log),
    ]);
    let downloader = MockDownloader::default();

    manager.download(&downloader, Request::new(url("/"))).await.unwrap();

    assert_eq!(
        entries(&log),
        [
            "a:request",
            "b:request",
            "c:request",
            "c:response",
            "b:response",
            "a:response"
        ]
    );
}

#[tokio::test]
async fn request_handler_response_skips_download() {
    let log = new_log();
    let fixed = Response::new(url("/cached"), "cached!");
    let fixed_for_stage = fixed.clone();
    let manager = manager(vec![
        Scripted::passthrough("outer", &log),
        Scripted::new("cache", &log).request(move |_| Ok(fixed_for_stage.clone().into())),
        Scripted::passthrough("inner", &log),
    ]);
    let downloader = MockDownloader::default();

    let output = manager.download(&downloader, Request::new(url("/"))).await.unwrap();
    let response = output.into_response().unwrap();

    assert!(response.same_as(&fixed));
    assert_eq!(downloader.calls(), 0);
    assert_eq!(manager.current_size(), "cached!".len());
    assert_eq!(
        entries(&log),
        ["outer:request", "cache:request", "inner:response", "outer:response"]
    );
}

#[tokio::test]
async fn fixed_response_is_counted_once_across_runs() {
    let log = new_log();
    let fixed = Response::new(url("/cached"), "0123456789");
    let fixed_for_stage = fixed.clone();
    let manager = manager(vec![
        Scripted::new("cache", &log).request(move |_| Ok(fixed_for_stage.clone().into()))
    ]);
    let downloader = MockDownloader::default();

    for _ in 0..3 {
        manager.download(&downloader, Request::new(url("/"))).await.unwrap();
    }

    assert_eq!(downloader.calls(), 0);
    assert_eq!(manager.current_size(), 10);
    assert_eq!(manager.tracked_responses(), 1);
}

#[tokio::test]
async fn request_handler_foreign_value_is_rejected() {
    let log = new_log();
    let manager = manager(vec![
        Scripted::new("Answer", &log).request(|_| Ok(StageOutput::foreign(42_i32))),
        Scripted::passthrough("never", &log),
    ]);
    let downloader = MockDownloader::default();

    let err = manager
        .download(&downloader, Request::new(url("/")))
        .await
        .unwrap_err();

    match err {
        PipelineError::InvalidStageOutput {
            stage,
            phase,
            received,
            ..
        } => {
            assert_eq!(stage, "Answer");
            assert_eq!(phase, Phase::Request);
            assert_eq!(received, "i32");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(downloader.calls(), 0);
    assert_eq!(entries(&log), ["Answer:request"]);
}

#[tokio::test]
async fn request_handler_request_ends_run() {
    let log = new_log();
    let manager = manager(vec![
        Scripted::passthrough("outer", &log),
        Scripted::new("redirect", &log).request(|_| Ok(Request::new(url("/moved")).into())),
        Scripted::passthrough("inner", &log),
    ]);
    let downloader = MockDownloader::default();

    let output = manager.download(&downloader, Request::new(url("/"))).await.unwrap();

    assert_eq!(output.into_request().unwrap().url, url("/moved"));
    assert_eq!(downloader.calls(), 0);
    assert_eq!(entries(&log), ["outer:request", "redirect:request"]);
}

#[tokio::test]
async fn request_handlers_may_mutate_the_request() {
    let log = new_log();
    let manager = manager(vec![Scripted::new("ua", &log).request(|request| {
        request
            .headers
            .insert(http::header::USER_AGENT, HeaderValue::from_static("spider/1.0"));
        Ok(StageOutput::Continue)
    })]);
    let downloader = MockDownloader::default();

    manager.download(&downloader, Request::new(url("/"))).await.unwrap();

    let seen = downloader.seen.lock();
    assert_eq!(seen[0].headers[http::header::USER_AGENT], "spider/1.0");
}

#[tokio::test]
async fn exception_handler_recovers_and_response_phase_runs() {
    let log = new_log();
    let manager = manager(vec![
        Scripted::new("flagger", &log)
            .response(|_, response| Ok(response.replace().flag("seen").build().into())),
        Scripted::new("fallback", &log).exception(|request, fault| {
            assert!(matches!(fault, Fault::Download(DownloadError::Connection(_))));
            Ok(Response::builder(request.url.clone())
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .body("fallback")
                .build()
                .into())
        }),
    ]);
    let downloader = MockDownloader::failing();

    let output = manager.download(&downloader, Request::new(url("/"))).await.unwrap();
    let response = output.into_response().unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.flags(), ["seen".to_string()]);
    assert_eq!(entries(&log), ["fallback:exception", "flagger:response"]);
    assert_eq!(manager.current_size(), "fallback".len());
}

#[tokio::test]
async fn exception_handlers_run_in_reverse_and_stop_at_first_recovery() {
    let log = new_log();
    let manager = manager(vec![
        Scripted::passthrough("outer", &log),
        Scripted::new("recover", &log)
            .exception(|request, _| Ok(Response::new(request.url.clone(), "ok").into())),
        Scripted::new("inner", &log).exception(|_, _| Ok(StageOutput::Continue)),
    ]);
    let downloader = MockDownloader::failing();

    manager.download(&downloader, Request::new(url("/"))).await.unwrap();

    assert_eq!(
        entries(&log),
        [
            "outer:request",
            "inner:exception",
            "recover:exception",
            "outer:response"
        ]
    );
}

#[tokio::test]
async fn unrecovered_fault_is_returned_verbatim() {
    let log = new_log();
    let manager = manager(vec![Scripted::passthrough("a", &log)]);
    let downloader = MockDownloader::failing();

    let err = manager
        .download(&downloader, Request::new(url("/")))
        .await
        .unwrap_err();

    assert_eq!(
        err.as_fault(),
        Some(&Fault::Download(DownloadError::Connection(
            "connection refused".into()
        )))
    );
    assert_eq!(entries(&log), ["a:request", "a:exception"]);
}

#[tokio::test]
async fn ignore_signal_goes_through_exception_phase() {
    let log = new_log();
    let manager = manager(vec![
        Scripted::new("watcher", &log).exception(|_, fault| {
            assert!(fault.is_ignore());
            Ok(StageOutput::Continue)
        }),
        Scripted::new("offsite", &log)
            .request(|request| Err(Fault::IgnoreRequest(format!("offsite: {}", request.url)))),
    ]);
    let downloader = MockDownloader::default();

    let err = manager
        .download(&downloader, Request::new(url("/")))
        .await
        .unwrap_err();

    assert!(err.as_fault().is_some_and(Fault::is_ignore));
    assert_eq!(downloader.calls(), 0);
    assert_eq!(entries(&log), ["offsite:request", "watcher:exception"]);
}

#[tokio::test]
async fn exception_handler_request_skips_response_phase() {
    let log = new_log();
    let manager = manager(vec![Scripted::passthrough("a", &log)
        .exception(|_, _| Ok(Request::new(url("/retry")).with_dont_filter(true).into()))]);
    let downloader = MockDownloader::failing();

    let output = manager.download(&downloader, Request::new(url("/"))).await.unwrap();

    let retry = output.into_request().unwrap();
    assert!(retry.dont_filter);
    assert_eq!(entries(&log), ["a:request", "a:exception"]);
}

#[tokio::test]
async fn exception_handler_foreign_value_is_rejected() {
    let log = new_log();
    let manager = manager(vec![
        Scripted::new("broken", &log).exception(|_, _| Ok(StageOutput::foreign(vec![1u8])))
    ]);
    let downloader = MockDownloader::failing();

    let err = manager
        .download(&downloader, Request::new(url("/")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::InvalidStageOutput {
            phase: Phase::Exception,
            ..
        }
    ));
}

#[tokio::test]
async fn response_handler_continue_is_rejected() {
    let log = new_log();
    let manager = manager(vec![
        Scripted::new("lazy", &log).response(|_, _| Ok(StageOutput::Continue))
    ]);
    let downloader = MockDownloader::default();

    let err = manager
        .download(&downloader, Request::new(url("/")))
        .await
        .unwrap_err();

    match err {
        PipelineError::InvalidStageOutput {
            stage,
            phase,
            received,
            ..
        } => {
            assert_eq!(stage, "lazy");
            assert_eq!(phase, Phase::Response);
            assert_eq!(received, "Continue");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn response_handler_request_stops_response_phase() {
    let log = new_log();
    // Response handlers run in reverse: "first", then "second", then "third".
    let manager = manager(vec![
        Scripted::passthrough("third", &log),
        Scripted::new("second", &log)
            .response(|_, _| Ok(Request::new(url("/login")).into())),
        Scripted::new("first", &log)
            .response(|request, _| Ok(Response::new(request.url.clone(), "r3").into())),
    ]);
    let downloader = MockDownloader::default();

    let output = manager.download(&downloader, Request::new(url("/"))).await.unwrap();

    assert_eq!(output.into_request().unwrap().url, url("/login"));
    assert_eq!(
        entries(&log),
        ["third:request", "first:response", "second:response"]
    );
}

#[tokio::test]
async fn replaced_responses_are_released_when_dropped() {
    let log = new_log();
    let manager = manager(vec![Scripted::new("shrink", &log)
        .response(|_, response| Ok(response.replace().body("tiny").build().into()))]);
    let downloader = MockDownloader::default();

    let output = manager.download(&downloader, Request::new(url("/"))).await.unwrap();
    let response = output.into_response().unwrap();

    // The downloaded response has no owner left; only the replacement is alive.
    assert_eq!(manager.current_size(), 4);
    assert_eq!(manager.tracked_responses(), 1);
    assert!(manager.tracker().is_tracked(&response));

    drop(response);
    assert_eq!(manager.current_size(), 0);
}

#[tokio::test]
async fn response_handler_fault_propagates() {
    let log = new_log();
    let manager = manager(vec![
        Scripted::passthrough("outer", &log),
        Scripted::new("strict", &log)
            .response(|_, _| Err(Fault::middleware("strict", "bad status"))),
    ]);
    let downloader = MockDownloader::default();

    let err = manager
        .download(&downloader, Request::new(url("/")))
        .await
        .unwrap_err();

    assert_eq!(err.as_fault(), Some(&Fault::middleware("strict", "bad status")));
    assert_eq!(entries(&log), ["outer:request", "strict:response"]);
}

struct Rendezvous {
    barrier: tokio::sync::Barrier,
}

impl Middleware for Rendezvous {
    fn request_handler(self: Arc<Self>) -> Option<Arc<dyn RequestHandler>> {
        Some(self)
    }
}

#[async_trait]
impl RequestHandler for Rendezvous {
    async fn process_request(&self, _request: &mut Request) -> Result<StageOutput, Fault> {
        self.barrier.wait().await;
        Ok(StageOutput::Continue)
    }
}

#[tokio::test]
async fn suspended_runs_do_not_block_each_other() {
    let runs = 8;
    let manager = Arc::new(DownloaderMiddlewareManager::from_middlewares(vec![Arc::new(
        Rendezvous {
            barrier: tokio::sync::Barrier::new(runs),
        },
    )]));
    let downloader = Arc::new(MockDownloader {
        delay: Some(Duration::from_millis(5)),
        ..Default::default()
    });

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..runs {
        let manager = Arc::clone(&manager);
        let downloader = Arc::clone(&downloader);
        tasks.spawn(async move {
            manager
                .download(downloader.as_ref(), Request::new(url(&format!("/{i}"))))
                .await
        });
    }

    let outputs = tokio::time::timeout(Duration::from_secs(5), async {
        let mut outputs = Vec::new();
        while let Some(res) = tasks.join_next().await {
            outputs.push(res.unwrap().unwrap().into_response().unwrap());
        }
        outputs
    })
    .await
    .expect("pipeline runs deadlocked");

    assert_eq!(downloader.calls(), runs);
    assert_eq!(manager.current_size(), runs * "downloaded body".len());
    drop(outputs);
    assert_eq!(manager.current_size(), 0);
}

struct Lifecycle {
    name: &'static str,
    fail_close: bool,
    log: Log,
}

#[async_trait]
impl Middleware for Lifecycle {
    fn name(&self) -> &str {
        self.name
    }

    async fn open(&self) -> Result<(), Fault> {
        self.log.lock().push(format!("{}:open", self.name));
        Ok(())
    }

    async fn close(&self) -> Result<(), Fault> {
        self.log.lock().push(format!("{}:close", self.name));
        if self.fail_close {
            return Err(Fault::middleware(self.name, "flush failed"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn close_runs_every_hook_and_reports_first_failure() {
    let log = new_log();
    let lifecycle = |name, fail_close| -> Arc<dyn Middleware> {
        Arc::new(Lifecycle {
            name,
            fail_close,
            log: Arc::clone(&log),
        })
    };
    let manager = DownloaderMiddlewareManager::from_middlewares(vec![
        lifecycle("a", false),
        lifecycle("b", true),
        lifecycle("c", true),
    ]);

    manager.open().await.unwrap();
    let err = manager.close().await.unwrap_err();

    assert_eq!(err.as_fault(), Some(&Fault::middleware("b", "flush failed")));
    let mut closed: Vec<String> = entries(&log)
        .into_iter()
        .filter(|e| e.ends_with(":close"))
        .collect();
    closed.sort();
    assert_eq!(closed, ["a:close", "b:close", "c:close"]);
    assert_eq!(manager.middleware_names(), ["a", "b", "c"]);
}
