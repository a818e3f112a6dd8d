use tejx_bridge::{
    AcquireError, BytesSource, ExecutionBridge, HostState, InvokeError, ModuleHost, ENTRY_POINT,
};

fn guest(name: &str) -> Vec<u8> {
    let path = format!("{}/tests/guests/{}", env!("CARGO_MANIFEST_DIR"), name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("failed to read guest {}: {}", path, e))
}

/// Helper: bridge over an in-memory guest, already initialized.
async fn ready_bridge(name: &str) -> ExecutionBridge {
    let bridge = ExecutionBridge::with_host(ModuleHost::new(BytesSource::new(guest(name)).labelled(name)));
    bridge.initialize().await;
    assert!(bridge.state().is_ready(), "{} did not load: {}", name, bridge.state());
    bridge
}

async fn unavailable_reason(bytes: Vec<u8>) -> HostState {
    let bridge = ExecutionBridge::with_host(ModuleHost::new(BytesSource::new(bytes)));
    bridge.initialize().await;
    bridge.state()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_echo_returns_module_output() {
    let bridge = ready_bridge("echo.wat").await;

    let result = bridge.execute("let a = 1;\nprint(a);").await;
    assert!(result.succeeded);
    assert_eq!(result.lines, vec!["let a = 1;", "print(a);"]);
    assert_eq!(result.failure_detail, None);
    assert!(!result.is_simulated());
}

#[tokio::test(flavor = "current_thread")]
async fn test_empty_source_is_passed_through() {
    let bridge = ready_bridge("echo.wat").await;

    let result = bridge.execute("").await;
    assert!(result.succeeded);
    assert!(result.lines.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trap_fails_one_call_only() {
    let bridge = ready_bridge("echo.wat").await;

    let trapped = bridge.execute("!crash").await;
    assert!(!trapped.succeeded);
    let detail = trapped.failure_detail.expect("trap must carry a reason");
    assert!(!detail.is_empty());
    assert!(detail.contains("trapped"), "unexpected detail: {}", detail);

    assert!(bridge.state().is_ready());
    let next = bridge.execute("fine").await;
    assert!(next.succeeded);
    assert_eq!(next.lines, vec!["fine"]);
}

#[tokio::test(flavor = "current_thread")]
async fn test_abort_is_recorded_with_message() {
    let bridge = ready_bridge("echo.wat").await;

    match bridge.host().invoke(ENTRY_POINT, "?").await {
        Err(InvokeError::Aborted(abort)) => {
            assert_eq!(abort.message.as_deref(), Some("boom"));
            assert_eq!(abort.file, None);
            assert_eq!((abort.line, abort.column), (7, 3));
        }
        other => panic!("expected abort, got {:?}", other),
    }

    let result = bridge.execute("?again").await;
    assert!(!result.succeeded);
    assert_eq!(
        result.failure_detail.as_deref(),
        Some("module aborted: boom (line 7:3)")
    );
    assert!(bridge.execute("ok").await.succeeded);
}

#[tokio::test(flavor = "current_thread")]
async fn test_non_zero_status_fails_with_output() {
    let bridge = ready_bridge("echo.wat").await;

    let result = bridge.execute("#partial").await;
    assert!(!result.succeeded);
    assert_eq!(result.lines, vec!["#partial"]);
    assert_eq!(result.failure_detail.as_deref(), Some("module exited with status 3"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_runaway_guest_runs_out_of_fuel() {
    let bridge = ready_bridge("echo.wat").await;

    let err = bridge.host().invoke(ENTRY_POINT, "~spin").await.unwrap_err();
    assert!(matches!(err, InvokeError::OutOfFuel), "got {:?}", err);

    let result = bridge.execute("after").await;
    assert!(result.succeeded);
    assert_eq!(result.lines, vec!["after"]);
}

#[tokio::test(flavor = "current_thread")]
async fn test_module_with_own_memory() {
    let bridge = ready_bridge("own_memory.wat").await;

    let result = bridge.execute("anything").await;
    assert!(result.succeeded);
    assert_eq!(result.lines, vec!["hello", "world"]);
}

#[tokio::test(flavor = "current_thread")]
async fn test_output_outside_memory_is_rejected() {
    let bridge = ready_bridge("bad_output.wat").await;

    let err = bridge.host().invoke(ENTRY_POINT, "x").await.unwrap_err();
    assert!(matches!(err, InvokeError::OutputOutOfBounds { len: 64, .. }), "got {:?}", err);
    assert!(!bridge.execute("x").await.succeeded);
    assert!(bridge.state().is_ready());
}

#[tokio::test(flavor = "current_thread")]
async fn test_unknown_entry_point() {
    let bridge = ready_bridge("echo.wat").await;

    let err = bridge.host().invoke("compile", "x").await.unwrap_err();
    assert!(matches!(err, InvokeError::MissingEntryPoint(ref name) if name == "compile"));
    assert!(err.is_module_fault());
    assert!(bridge.state().is_ready());
}

#[tokio::test(flavor = "current_thread")]
async fn test_oversized_source_is_rejected() {
    let bridge = ready_bridge("own_memory.wat").await;

    // Scratch offset is 64 KiB into a 128 KiB memory.
    let source = "a".repeat(70 * 1024);
    let err = bridge.host().invoke(ENTRY_POINT, &source).await.unwrap_err();
    assert!(matches!(err, InvokeError::InputTooLarge { len } if len == source.len()));
}

#[tokio::test(flavor = "current_thread")]
async fn test_invoke_requires_ready() {
    let host = ModuleHost::new(BytesSource::new(guest("echo.wat")));
    let err = host.invoke(ENTRY_POINT, "x").await.unwrap_err();
    assert!(matches!(err, InvokeError::NotReady));
    assert!(!err.is_module_fault());
}

#[tokio::test(flavor = "current_thread")]
async fn test_malformed_binary_is_unavailable() {
    let state = unavailable_reason(b"\0asm\x01\0\0\0garbage".to_vec()).await;
    assert!(matches!(state.reason(), Some(AcquireError::Compile(_))), "got {}", state);
}

#[tokio::test(flavor = "current_thread")]
async fn test_undeclared_import_is_unavailable() {
    let state = unavailable_reason(guest("extra_import.wat")).await;
    assert!(matches!(state.reason(), Some(AcquireError::Instantiate(_))), "got {}", state);
}

#[tokio::test(flavor = "current_thread")]
async fn test_oversized_memory_import_is_unavailable() {
    let state = unavailable_reason(guest("big_memory.wat")).await;
    assert!(matches!(state.reason(), Some(AcquireError::Instantiate(_))), "got {}", state);
}

#[tokio::test(flavor = "current_thread")]
async fn test_start_trap_is_unavailable() {
    let state = unavailable_reason(guest("start_trap.wat")).await;
    assert!(matches!(state.reason(), Some(AcquireError::Instantiate(_))), "got {}", state);
}

#[tokio::test(flavor = "current_thread")]
async fn test_missing_entry_point_is_unavailable() {
    let state = unavailable_reason(guest("no_entry.wat")).await;
    assert!(
        matches!(state.reason(), Some(AcquireError::MissingEntryPoint(name)) if name == ENTRY_POINT),
        "got {}",
        state
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_module_still_simulates() {
    let bridge = ExecutionBridge::with_host(ModuleHost::new(BytesSource::new(guest("extra_import.wat"))));
    bridge.initialize().await;

    let result = bridge.execute("x").await;
    assert!(result.succeeded);
    assert!(result.is_simulated());
    assert_eq!(result.lines[0], "[Simulated] Input length: 1");
}

#[tokio::test(flavor = "current_thread")]
async fn test_memory_without_scratch_room_is_unavailable() {
    let state = unavailable_reason(guest("small_memory.wat")).await;
    assert!(
        matches!(
            state.reason(),
            Some(AcquireError::MemoryTooSmall { size: 65536, required: 65544 })
        ),
        "got {}",
        state
    );
}
