use std::ffi::{CStr, CString};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jobfeed_core::backend::HttpSearchBackend;
use jobfeed_core::models::{ChannelSignal, FeedError, FeedResult, SearchQuery};
use jobfeed_core::projection::{QuickFilterKey, SortMode};
use jobfeed_core::transport::ChannelTransport;
use jobfeed_core::{FeedConfig, FeedSession};
use lazy_static::lazy_static;
use libc::c_char;
use serde::Serialize;

struct FeedState {
    session: FeedSession,
    transport: Arc<ChannelTransport>,
    runtime: tokio::runtime::Runtime,
}

lazy_static! {
    static ref STATE: Mutex<Option<FeedState>> = Mutex::new(None);
    static ref LAST_ERROR: Mutex<Option<FeedError>> = Mutex::new(None);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn record_error(error: FeedError) {
    tracing::error!(kind = ?error.kind, message = %error.message, "jobfeed call failed");
    *lock(&LAST_ERROR) = Some(error);
}

/// # Safety
///
/// `raw` must be null or point to a NUL-terminated C string that outlives `'a`.
unsafe fn read_str<'a>(raw: *const c_char, what: &str) -> FeedResult<&'a str> {
    if raw.is_null() {
        return Err(FeedError::invalid_input(format!("{what} pointer is null")));
    }
    let c_str = unsafe { CStr::from_ptr(raw) };
    c_str
        .to_str()
        .map_err(|_| FeedError::invalid_input(format!("{what} is not valid UTF-8")))
}

fn to_c_json<T: Serialize>(value: &T) -> *mut c_char {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(error) => {
            tracing::error!(error = %error, "failed to serialize FFI payload");
            return std::ptr::null_mut();
        }
    };

    match CString::new(json) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Runs `call` against the live session without holding the global lock
/// while it awaits.
fn drive<F, Fut>(call: F) -> bool
where
    F: FnOnce(FeedSession) -> Fut,
    Fut: Future<Output = FeedResult<()>>,
{
    let (session, handle) = {
        let guard = lock(&STATE);
        let Some(state) = guard.as_ref() else {
            record_error(FeedError::invalid_input("jobfeed_init has not been called"));
            return false;
        };
        (state.session.clone(), state.runtime.handle().clone())
    };

    match handle.block_on(call(session)) {
        Ok(()) => true,
        Err(error) => {
            record_error(error);
            false
        }
    }
}

fn with_transport(apply: impl FnOnce(&ChannelTransport) -> FeedResult<()>) -> bool {
    let guard = lock(&STATE);
    let Some(state) = guard.as_ref() else {
        record_error(FeedError::invalid_input("jobfeed_init has not been called"));
        return false;
    };

    match apply(&state.transport) {
        Ok(()) => true,
        Err(error) => {
            record_error(error);
            false
        }
    }
}

/// Starts the feed engine. `config_json` must name a `search_endpoint`;
/// every other field has a default. A null or endpoint-less config fails
/// with `InvalidInput`.
///
/// # Safety
///
/// `config_json` must be null or a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobfeed_init(config_json: *const c_char) -> bool {
    if lock(&STATE).is_some() {
        return true;
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let config = if config_json.is_null() {
        Ok(FeedConfig::default())
    } else {
        unsafe { read_str(config_json, "config") }.and_then(FeedConfig::from_json)
    };
    let config = match config {
        Ok(config) => config,
        Err(error) => {
            record_error(error);
            return false;
        }
    };

    let Some(endpoint) = config.search_endpoint.clone() else {
        record_error(FeedError::invalid_input("config is missing 'search_endpoint'"));
        return false;
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            record_error(FeedError::new(
                jobfeed_core::models::FeedErrorKind::Internal,
                format!("failed to create tokio runtime: {error}"),
            ));
            return false;
        }
    };

    let backend = Arc::new(HttpSearchBackend::new(endpoint, config.request_timeout()));
    let transport = Arc::new(ChannelTransport::new());
    let session = {
        let _entered = runtime.enter();
        FeedSession::new(config, backend, transport.clone())
    };
    let session = match session {
        Ok(session) => session,
        Err(error) => {
            record_error(error);
            return false;
        }
    };

    *lock(&STATE) = Some(FeedState {
        session,
        transport,
        runtime,
    });
    tracing::info!("jobfeed initialized");
    true
}

/// Submits a search query given as JSON. Blocks until the first page has
/// been fetched or the fetch failed.
///
/// # Safety
///
/// `query_json` must be a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobfeed_submit_query(query_json: *const c_char) -> bool {
    match unsafe { read_str(query_json, "query") } {
        Ok(raw) => drive(|session| {
            let query = parse_query(raw, session.config().default_page_size);
            async move { session.submit_query(query?).await }
        }),
        Err(error) => {
            record_error(error);
            false
        }
    }
}

/// Hosts may omit `page_size`; the configured default fills it in.
fn parse_query(raw: &str, default_page_size: u32) -> FeedResult<SearchQuery> {
    let invalid = |error: serde_json::Error| FeedError::invalid_input(format!("invalid query: {error}"));
    let mut value: serde_json::Value = serde_json::from_str(raw).map_err(invalid)?;
    if let Some(object) = value.as_object_mut() {
        object
            .entry("page_size")
            .or_insert_with(|| default_page_size.into());
    }
    serde_json::from_value(value).map_err(invalid)
}

#[unsafe(no_mangle)]
pub extern "C" fn jobfeed_go_to_page(page: u32) -> bool {
    drive(|session| async move { session.go_to_page(page).await })
}

#[unsafe(no_mangle)]
pub extern "C" fn jobfeed_set_page_size(page_size: u32) -> bool {
    drive(|session| async move { session.set_page_size(page_size).await })
}

/// # Safety
///
/// `mode` must be a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobfeed_set_sort_mode(mode: *const c_char) -> bool {
    let mode = unsafe { read_str(mode, "sort mode") }.and_then(|raw| {
        SortMode::parse(raw)
            .ok_or_else(|| FeedError::invalid_input(format!("unknown sort mode '{raw}'")))
    });
    match mode {
        Ok(mode) => drive(|session| async move { session.set_sort_mode(mode).await }),
        Err(error) => {
            record_error(error);
            false
        }
    }
}

/// Toggles a quick-filter chip, e.g. `{"type":"remote"}` or
/// `{"type":"keyword","value":"rust"}`.
///
/// # Safety
///
/// `filter_json` must be a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobfeed_toggle_quick_filter(filter_json: *const c_char) -> bool {
    let key = unsafe { read_str(filter_json, "filter") }.and_then(|raw| {
        serde_json::from_str::<QuickFilterKey>(raw)
            .map_err(|error| FeedError::invalid_input(format!("invalid filter: {error}")))
    });
    match key {
        Ok(key) => drive(|session| async move { session.toggle_quick_filter(key).await }),
        Err(error) => {
            record_error(error);
            false
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn jobfeed_retry_connection() -> bool {
    drive(|session| async move { session.retry_connection().await })
}

/// Current feed view as JSON, or null before `jobfeed_init`.
#[unsafe(no_mangle)]
pub extern "C" fn jobfeed_current_view() -> *mut c_char {
    let guard = lock(&STATE);
    match guard.as_ref() {
        Some(state) => to_c_json(&state.session.snapshot()),
        None => std::ptr::null_mut(),
    }
}

/// Filters of the live change-feed subscriptions, so the host knows what to
/// listen for.
#[unsafe(no_mangle)]
pub extern "C" fn jobfeed_subscription_filters() -> *mut c_char {
    let guard = lock(&STATE);
    match guard.as_ref() {
        Some(state) => to_c_json(&state.transport.active_filters()),
        None => std::ptr::null_mut(),
    }
}

/// Hands a change envelope (`{"eventType": ..., "new": ..., "old": ...}`)
/// received by the host to the feed.
///
/// # Safety
///
/// `envelope_json` must be a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobfeed_push_change_event(envelope_json: *const c_char) -> bool {
    with_transport(|transport| {
        let raw = unsafe { read_str(envelope_json, "change envelope") }?;
        transport.publish_json(raw).map(|_| ())
    })
}

/// Reports a channel status string from the host's realtime client:
/// `SUBSCRIBED`, `CHANNEL_ERROR`, `TIMED_OUT` or `CLOSED`.
///
/// # Safety
///
/// `status` must be a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobfeed_report_channel_status(status: *const c_char) -> bool {
    with_transport(|transport| {
        let raw = unsafe { read_str(status, "channel status") }?;
        let signal = ChannelSignal::parse(raw)
            .ok_or_else(|| FeedError::invalid_input(format!("unknown channel status '{raw}'")))?;
        transport.report(signal);
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jobfeed_set_channel_healthy(healthy: bool) -> bool {
    with_transport(|transport| {
        transport.set_healthy(healthy);
        Ok(())
    })
}

/// Most recent error as JSON, cleared by the call. Null when there is none.
#[unsafe(no_mangle)]
pub extern "C" fn jobfeed_take_last_error() -> *mut c_char {
    match lock(&LAST_ERROR).take() {
        Some(error) => to_c_json(&error),
        None => std::ptr::null_mut(),
    }
}

/// Stops the session and drops the runtime. `jobfeed_init` may be called
/// again afterwards.
#[unsafe(no_mangle)]
pub extern "C" fn jobfeed_shutdown() {
    let Some(state) = lock(&STATE).take() else {
        return;
    };
    state.runtime.block_on(state.session.shutdown());
    state.runtime.shutdown_background();
}

/// Free a string previously returned by a `jobfeed_*` function.
///
/// # Safety
///
/// `s` must be a pointer previously returned by a `jobfeed_*` function, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobfeed_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        let _ = CString::from_raw(s);
    }
}
