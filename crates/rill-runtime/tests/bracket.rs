mod support;

use rill_runtime::{ExitCase, Pull, StreamError};
use support::{Events, Gauge, bracket, events, exit_label, log_effect, record, resource, resource_with, snapshot};

fn log_exit(log: &Events) -> impl FnOnce(&'static str, ExitCase) -> Pull<i32, ()> + Send + 'static {
    let log = log.clone();
    move |name: &'static str, exit: ExitCase| {
        Pull::eval(move || async move {
            record(&log, format!("{name} {}", exit_label(&exit)));
            Ok(())
        })
    }
}

#[tokio::test]
async fn single_bracket_releases_after_use() {
    let log = events();
    let out = bracket(&log, "a", |_| Pull::output1(1)).to_vec().await.unwrap();
    assert_eq!(out, vec![1]);
    assert_eq!(snapshot(&log), vec!["acquire a", "release a completed"]);
}

#[tokio::test]
async fn nested_brackets_release_inner_first() {
    let log = events();
    let inner = log.clone();
    let pull = bracket(&log, "a", move |_| {
        Pull::output1(1).append(move || bracket(&inner, "b", |_| Pull::output1(2)))
    });
    assert_eq!(pull.to_vec().await.unwrap(), vec![1, 2]);
    assert_eq!(
        snapshot(&log),
        vec![
            "acquire a",
            "acquire b",
            "release b completed",
            "release a completed"
        ]
    );
}

#[tokio::test]
async fn appended_brackets_do_not_overlap() {
    let log = events();
    let second = log.clone();
    let pull = bracket(&log, "a", |_| Pull::output1(1))
        .append(move || bracket(&second, "b", |_| Pull::output1(2)));
    assert_eq!(pull.to_vec().await.unwrap(), vec![1, 2]);
    assert_eq!(
        snapshot(&log),
        vec![
            "acquire a",
            "release a completed",
            "acquire b",
            "release b completed"
        ]
    );
}

#[tokio::test]
async fn resources_in_one_scope_release_last_first() {
    let log = events();
    let more = log.clone();
    let pull = resource(&log, "a")
        .flat_map(move |_| resource(&more, "b"))
        .flat_map(|_| Pull::output1(1))
        .scope();
    pull.drain().await.unwrap();
    assert_eq!(
        snapshot(&log),
        vec![
            "acquire a",
            "acquire b",
            "release b completed",
            "release a completed"
        ]
    );
}

#[tokio::test]
async fn use_and_release_failures_are_composed() {
    for scoped in [false, true] {
        let log = events();
        let mut pull = resource_with(&log, "r", Some("release failed"))
            .flat_map(|_| Pull::<i32, ()>::fail(StreamError::msg("use failed")));
        if scoped {
            pull = pull.scope();
        }
        let err = pull.drain().await.unwrap_err();
        assert_eq!(err.primary().to_string(), "use failed");
        assert!(err.mentions("release failed"));
        assert_eq!(err.flatten().len(), 2);
        assert_eq!(snapshot(&log), vec!["acquire r", "release r failed"]);
    }
}

#[tokio::test]
async fn release_failure_alone_fails_the_stream() {
    let log = events();
    let pull = resource_with(&log, "r", Some("release failed"))
        .flat_map(|_| Pull::output1(1))
        .scope();
    let err = pull.to_vec().await.unwrap_err();
    assert_eq!(err.to_string(), "release failed");
    assert_eq!(snapshot(&log), vec!["acquire r", "release r completed"]);
}

#[tokio::test]
async fn failing_finalizers_in_nested_scopes_all_run() {
    let log = events();
    let inner = log.clone();
    let pull = resource_with(&log, "a", Some("a failed"))
        .flat_map(move |_| {
            resource_with(&inner, "b", Some("b failed"))
                .flat_map(|_| Pull::output1(1))
                .scope()
        })
        .scope();
    let err = pull.drain().await.unwrap_err();
    assert_eq!(err.primary().to_string(), "b failed");
    assert!(err.mentions("a failed"));
    assert_eq!(
        snapshot(&log),
        vec!["acquire a", "acquire b", "release b completed", "release a failed"]
    );
}

#[tokio::test]
async fn handlers_run_after_the_failed_scope_is_closed() {
    let log = events();
    let handled = log.clone();
    let pull = bracket(&log, "a", |_| {
        Pull::output1(1).append(|| Pull::fail(StreamError::msg("boom")))
    })
    .handle_error_with(move |err| {
        record(&handled, format!("handled {err}"));
        Pull::output1(2)
    });
    assert_eq!(pull.to_vec().await.unwrap(), vec![1, 2]);
    assert_eq!(
        snapshot(&log),
        vec!["acquire a", "release a failed", "handled boom"]
    );
}

#[tokio::test]
async fn many_brackets_in_sequence_hold_one_resource_at_a_time() {
    let gauge = Gauge::default();
    let tracked = gauge.clone();
    let pull = Pull::loop_with(0u32, move |i| {
        if i == 10_000 {
            return Pull::pure(None);
        }
        tracked
            .acquire()
            .append(|| Pull::output1(1))
            .scope()
            .map(move |()| Some(i + 1))
    });
    let emitted = pull
        .compile(0usize, |count, chunk| {
            *count += chunk.len();
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(emitted, 10_000);
    assert_eq!(gauge.peak(), 1);
    assert_eq!(gauge.live(), 0);
    assert_eq!(gauge.released(), 10_000);
}

#[tokio::test]
async fn unconsumed_remainder_is_released_when_the_stream_ends() {
    let log = events();
    let pull = bracket(&log, "src", |_| {
        Pull::loop_with(0, |n| Pull::output1(n).map(move |()| Some(n + 1)))
    })
    .take(2)
    .void();
    assert_eq!(pull.to_vec().await.unwrap(), vec![0, 1]);
    assert_eq!(snapshot(&log), vec!["acquire src", "release src completed"]);
}

#[tokio::test]
async fn bracket_case_reports_how_the_body_ended() {
    let log = events();
    let pull = Pull::bracket_case(Pull::pure("ok"), |_| Pull::output1(1), log_exit(&log));
    assert_eq!(pull.to_vec().await.unwrap(), vec![1]);

    let pull = Pull::<i32, ()>::bracket_case(
        Pull::pure("bad"),
        |_| Pull::fail(StreamError::msg("body failed")),
        log_exit(&log),
    );
    let err = pull.drain().await.unwrap_err();
    assert_eq!(err.to_string(), "body failed");

    assert_eq!(snapshot(&log), vec!["ok completed", "bad failed"]);
}

#[tokio::test]
async fn bracket_case_composes_release_failures() {
    let pull = Pull::<i32, ()>::bracket_case(
        Pull::pure(()),
        |()| Pull::fail(StreamError::msg("body failed")),
        |(), _| Pull::fail(StreamError::msg("release failed")),
    );
    let err = pull.drain().await.unwrap_err();
    assert_eq!(err.primary().to_string(), "body failed");
    assert_eq!(err.suppressed().len(), 1);
    assert_eq!(err.suppressed()[0].to_string(), "release failed");
}

#[tokio::test]
async fn effects_between_brackets_see_released_resources() {
    let log = events();
    let between = log.clone();
    let last = log.clone();
    let pull = bracket(&log, "a", |_| Pull::done())
        .append(move || log_effect(&between, "between"))
        .append(move || bracket(&last, "b", |_| Pull::done()));
    pull.drain().await.unwrap();
    assert_eq!(
        snapshot(&log),
        vec![
            "acquire a",
            "release a completed",
            "between",
            "acquire b",
            "release b completed"
        ]
    );
}
