#[cfg(test)]
mod session_tests {
    use serenity::all::MessageId;
    use std::time::Duration;

    use crate::errors::{DecodeStartError, NotificationError, SessionError};
    use crate::event_handlers::apply_control;
    use crate::messages::ControlAction;
    use crate::session::{clamp_volume, Enqueued, SessionConfig};
    use crate::test::fakes::{quiet_config, track, FakeDecoder, Harness, Posted, SinkCall};
    use crate::{Error, LoopMode, PlaybackState};

    #[tokio::test]
    async fn test_first_enqueue_starts_playback() {
        let h = Harness::new();

        let outcome = h.session.enqueue(track("songA")).await.unwrap();

        assert_eq!(outcome, Enqueued::Started);
        assert_eq!(h.current_title().await.as_deref(), Some("songA"));
        assert_eq!(h.decoder.started(), vec!["songA"]);
        assert_eq!(h.sink.calls().last(), Some(&SinkCall::Play(1.0)));
        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert!(snapshot.pending.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_then_complete_advances() {
        let h = Harness::new();

        h.session.enqueue(track("songA")).await.unwrap();
        let outcome = h.session.enqueue(track("songB")).await.unwrap();
        assert_eq!(outcome, Enqueued::Queued(1));
        assert_eq!(h.current_title().await.as_deref(), Some("songA"));
        assert_eq!(h.pending_titles().await, vec!["songB"]);
        assert_eq!(h.decoder.started().len(), 1);

        h.sink.finish(None);

        assert_eq!(h.current_title().await.as_deref(), Some("songB"));
        assert!(h.pending_titles().await.is_empty());
        assert_eq!(h.decoder.started(), vec!["songA", "songB"]);
        assert_eq!(h.decoder.live(), 1);
        assert_eq!(
            h.notifier.messages(),
            vec![
                Posted::NowPlaying("songA".into(), MessageId::new(1)),
                Posted::Delete(MessageId::new(1)),
                Posted::NowPlaying("songB".into(), MessageId::new(2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_loop_single_replays_same_track() {
        let h = Harness::new();
        h.session.set_loop_mode(LoopMode::Single).await.unwrap();
        h.session.enqueue(track("songA")).await.unwrap();
        h.session.enqueue(track("songB")).await.unwrap();

        for _ in 0..4 {
            h.sink.finish(None);
            assert_eq!(h.current_title().await.as_deref(), Some("songA"));
            assert_eq!(h.pending_titles().await, vec!["songB"]);
        }
        assert_eq!(h.decoder.started(), vec!["songA"; 5]);
    }

    #[tokio::test]
    async fn test_loop_queue_cycles() {
        let h = Harness::new();
        h.session.set_loop_mode(LoopMode::Queue).await.unwrap();
        h.session.enqueue(track("A")).await.unwrap();
        h.session.enqueue(track("B")).await.unwrap();

        for _ in 0..5 {
            h.complete().await;
        }
        assert_eq!(h.decoder.started(), vec!["A", "B", "A", "B", "A", "B"]);
        assert_eq!(h.current_title().await.as_deref(), Some("B"));
        assert_eq!(h.pending_titles().await, vec!["A"]);
    }

    #[tokio::test]
    async fn test_loop_queue_single_track_never_empties() {
        let h = Harness::new();
        h.session.set_loop_mode(LoopMode::Queue).await.unwrap();
        h.session.enqueue(track("A")).await.unwrap();

        h.complete().await;
        h.complete().await;

        assert_eq!(h.current_title().await.as_deref(), Some("A"));
        assert!(h.pending_titles().await.is_empty());
        assert_eq!(h.decoder.started().len(), 3);
    }

    #[tokio::test]
    async fn test_loop_off_drains_to_idle() {
        let h = Harness::new();
        for name in ["A", "B", "C"] {
            h.session.enqueue(track(name)).await.unwrap();
        }

        let mut pending = h.pending_titles().await.len();
        for _ in 0..3 {
            h.sink.finish(None);
            let now = h.pending_titles().await.len();
            assert!(now <= pending);
            pending = now;
        }

        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(snapshot.current, None);
        assert_eq!(h.decoder.started(), vec!["A", "B", "C"]);
        assert_eq!(h.decoder.live(), 0);
        assert_eq!(h.notifier.messages().last(), Some(&Posted::QueueEnded));
    }

    #[tokio::test]
    async fn test_stop_from_every_state() {
        let h = Harness::new();

        // Idle.
        h.session.stop().await.unwrap();
        assert_eq!(h.session.snapshot().await.unwrap().state, PlaybackState::Idle);

        // Playing with pending tracks.
        h.session.enqueue(track("A")).await.unwrap();
        h.session.enqueue(track("B")).await.unwrap();
        h.session.stop().await.unwrap();
        let snapshot = h.session.snapshot().await.unwrap();
        assert!(snapshot.pending.is_empty());
        assert_eq!(snapshot.current, None);
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(h.decoder.live(), 0);
        assert_eq!(h.decoder.stops(), 1);

        // Paused.
        h.session.enqueue(track("C")).await.unwrap();
        h.session.pause().await.unwrap();
        h.session.stop().await.unwrap();
        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(snapshot.current, None);
        assert_eq!(h.decoder.stops(), 2);
    }

    #[tokio::test]
    async fn test_set_volume_clamps() {
        let h = Harness::new();
        assert_eq!(h.session.set_volume(-0.5).await.unwrap(), 0.0);
        assert_eq!(h.session.set_volume(3.0).await.unwrap(), 2.0);
        assert_eq!(h.session.set_volume(0.5).await.unwrap(), 0.5);
        assert_eq!(clamp_volume(f32::NAN), 1.0);

        // Volume carries into the next track and updates a live one.
        h.session.enqueue(track("A")).await.unwrap();
        assert_eq!(h.sink.calls().last(), Some(&SinkCall::Play(0.5)));
        assert_eq!(h.session.nudge_volume(0.1).await.unwrap(), 0.6);
        assert_eq!(h.sink.calls().last(), Some(&SinkCall::SetVolume(0.6)));
        assert_eq!(h.session.snapshot().await.unwrap().volume, 0.6);
    }

    #[tokio::test]
    async fn test_default_volume_from_config() {
        let config = SessionConfig {
            default_volume: 0.25,
            ..quiet_config()
        };
        let h = Harness::with(FakeDecoder::default(), config);
        assert_eq!(h.session.snapshot().await.unwrap().volume, 0.25);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_single_live_decode() {
        let h = Harness::with(
            FakeDecoder::with_delay(Duration::from_millis(20)),
            quiet_config(),
        );

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let session = h.session.clone();
                tokio::spawn(async move { session.enqueue(track(&format!("t{i}"))).await })
            })
            .collect();
        let mut started = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() == Enqueued::Started {
                started += 1;
            }
        }

        assert_eq!(started, 1);
        assert_eq!(h.decoder.started().len(), 1);
        assert_eq!(h.pending_titles().await.len(), 7);

        for _ in 0..7 {
            h.complete().await;
        }
        assert_eq!(h.decoder.max_live(), 1);
    }

    #[tokio::test]
    async fn test_decode_start_failure_surfaces_and_idles() {
        let h = Harness::new();
        h.decoder.fail("songA");

        let err = h.session.enqueue(track("songA")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeStartError::Exited { .. })
        ));

        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(snapshot.current, None);
        assert!(snapshot.pending.is_empty());
        assert_eq!(h.decoder.started(), vec!["songA"]);
        assert!(h.notifier.notices().is_empty());
        // Nothing ever played, so there is no queue end to announce.
        assert!(!h.notifier.posted().contains(&Posted::QueueEnded));

        h.session.enqueue(track("songB")).await.unwrap();
        assert_eq!(h.decoder.started(), vec!["songA", "songB"]);
        assert_eq!(h.current_title().await.as_deref(), Some("songB"));
    }

    #[tokio::test]
    async fn test_failed_track_mid_queue_is_skipped() {
        let h = Harness::new();
        h.decoder.fail("B");
        for name in ["A", "B", "C"] {
            h.session.enqueue(track(name)).await.unwrap();
        }

        h.sink.finish(None);

        assert_eq!(h.current_title().await.as_deref(), Some("C"));
        assert_eq!(h.decoder.started(), vec!["A", "B", "C"]);
        let notices = h.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].starts_with("Could not play **B**"));
    }

    #[tokio::test]
    async fn test_playback_error_posts_notice_and_advances() {
        let h = Harness::new();
        h.session.enqueue(track("A")).await.unwrap();
        h.session.enqueue(track("B")).await.unwrap();

        h.sink.finish(Some("connection reset"));

        assert_eq!(h.current_title().await.as_deref(), Some("B"));
        assert_eq!(h.notifier.notices(), vec!["Playback error: connection reset"]);
    }

    #[tokio::test]
    async fn test_stale_completion_is_ignored() {
        let h = Harness::new();
        for name in ["A", "B", "C"] {
            h.session.enqueue(track(name)).await.unwrap();
        }

        let skipped = h.session.skip().await.unwrap();
        assert_eq!(skipped.title, "A");
        // The sink reports A's end late, after B already started.
        h.sink.finish_nth(0);

        assert_eq!(h.current_title().await.as_deref(), Some("B"));
        assert_eq!(h.pending_titles().await, vec!["C"]);
        assert_eq!(h.decoder.started(), vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_delete_retries_transient_errors() {
        let h = Harness::new();
        h.session.enqueue(track("A")).await.unwrap();
        h.session.enqueue(track("B")).await.unwrap();
        h.session.enqueue(track("C")).await.unwrap();

        h.notifier
            .script_deletes(vec![Err(NotificationError::Http("502 Bad Gateway".into()))]);
        h.complete().await;
        h.notifier.script_deletes(vec![Err(NotificationError::NotFound)]);
        h.complete().await;

        assert_eq!(
            h.notifier.messages(),
            vec![
                Posted::NowPlaying("A".into(), MessageId::new(1)),
                Posted::Delete(MessageId::new(1)),
                Posted::Delete(MessageId::new(1)),
                Posted::NowPlaying("B".into(), MessageId::new(2)),
                Posted::Delete(MessageId::new(2)),
                Posted::NowPlaying("C".into(), MessageId::new(3)),
            ]
        );
    }

    #[tokio::test]
    async fn test_skip_and_pause_state_errors() {
        let h = Harness::new();
        assert_eq!(h.session.skip().await.unwrap_err(), SessionError::NotPlaying);
        assert_eq!(h.session.pause().await.unwrap_err(), SessionError::NotPlaying);
        assert_eq!(h.session.resume().await.unwrap_err(), SessionError::NotPaused);

        h.session.enqueue(track("A")).await.unwrap();
        assert_eq!(h.session.resume().await.unwrap_err(), SessionError::NotPaused);
        h.session.pause().await.unwrap();
        assert_eq!(h.session.snapshot().await.unwrap().state, PlaybackState::Paused);
        assert_eq!(h.session.pause().await.unwrap_err(), SessionError::NotPlaying);
        h.session.resume().await.unwrap();
        assert_eq!(h.session.snapshot().await.unwrap().state, PlaybackState::Playing);

        let calls = h.sink.calls();
        assert!(calls.contains(&SinkCall::Pause));
        assert!(calls.contains(&SinkCall::Resume));
    }

    #[tokio::test]
    async fn test_skip_last_track_goes_idle() {
        let h = Harness::new();
        h.session.enqueue(track("A")).await.unwrap();

        h.session.skip().await.unwrap();

        let snapshot = h.session.snapshot().await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(h.decoder.live(), 0);
        assert_eq!(h.notifier.messages().last(), Some(&Posted::QueueEnded));
    }

    #[tokio::test]
    async fn test_loop_mode_cycles() {
        let h = Harness::new();
        assert_eq!(h.session.cycle_loop_mode().await.unwrap(), LoopMode::Single);
        assert_eq!(h.session.cycle_loop_mode().await.unwrap(), LoopMode::Queue);
        assert_eq!(h.session.cycle_loop_mode().await.unwrap(), LoopMode::Off);
    }

    #[tokio::test]
    async fn test_control_buttons() {
        let h = Harness::new();
        assert_eq!(
            apply_control(&h.session, ControlAction::Pause).await,
            "Nothing is playing right now."
        );

        h.session.enqueue(track("A")).await.unwrap();
        assert_eq!(
            apply_control(&h.session, ControlAction::Pause).await,
            "Paused playback."
        );
        assert_eq!(
            apply_control(&h.session, ControlAction::Play).await,
            "Resumed playback."
        );
        assert_eq!(
            apply_control(&h.session, ControlAction::VolumeDown).await,
            "Volume set to 90%"
        );
        assert_eq!(
            apply_control(&h.session, ControlAction::Loop).await,
            "Loop mode: Single"
        );
        assert_eq!(
            apply_control(&h.session, ControlAction::Skip).await,
            "Skipped **A**."
        );
        assert_eq!(
            apply_control(&h.session, ControlAction::Stop).await,
            "Cleared queue and stopped music."
        );
        assert_eq!(h.session.snapshot().await.unwrap().state, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_closed_session_reports_closed() {
        let h = Harness::new();
        h.session.enqueue(track("A")).await.unwrap();

        h.session.shutdown().await.unwrap();

        assert_eq!(h.decoder.live(), 0);
        assert!(h.sink.calls().contains(&SinkCall::Stop));
        assert_eq!(h.session.pause().await.unwrap_err(), SessionError::Closed);
        assert!(matches!(
            h.session.enqueue(track("B")).await.unwrap_err(),
            Error::Session(SessionError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_asks_to_leave() {
        let config = SessionConfig {
            idle_timeout: Some(Duration::from_secs(60)),
            ..quiet_config()
        };
        let mut h = Harness::with(FakeDecoder::default(), config);
        h.session.enqueue(track("A")).await.unwrap();

        // Playing keeps the session alive well past the timeout.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(h.idle_rx.try_recv().is_err());

        h.sink.finish(None);
        let guild = h.idle_rx.recv().await.unwrap();
        assert_eq!(guild, h.session.guild_id());
        assert_eq!(
            h.notifier.notices(),
            vec!["Leaving the voice channel due to inactivity."]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_cycles_and_stops_on_missing_message() {
        let config = SessionConfig {
            refresh_interval: Duration::from_secs(2),
            ..quiet_config()
        };
        let h = Harness::with(FakeDecoder::default(), config);
        h.notifier.script_refreshes(vec![
            Ok(()),
            Err(NotificationError::Http("502 Bad Gateway".into())),
            Ok(()),
            Err(NotificationError::NotFound),
        ]);
        h.session.enqueue(track("A")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;

        // The failed redraw is retried with the same frame; NotFound ends it.
        assert_eq!(h.notifier.refreshes(), vec![0, 1, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_cancelled_when_track_changes() {
        let config = SessionConfig {
            refresh_interval: Duration::from_secs(2),
            ..quiet_config()
        };
        let h = Harness::with(FakeDecoder::default(), config);
        h.session.enqueue(track("A")).await.unwrap();
        h.session.enqueue(track("B")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        h.sink.finish(None);
        let _ = h.session.snapshot().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let old = MessageId::new(1);
        let new = MessageId::new(2);
        let refreshed: Vec<MessageId> = h
            .notifier
            .posted()
            .into_iter()
            .filter_map(|p| match p {
                Posted::Refresh(id, _) => Some(id),
                _ => None,
            })
            .collect();
        let switch = refreshed.iter().position(|id| *id == new).unwrap();
        assert!(refreshed[..switch].iter().all(|id| *id == old));
        assert!(refreshed[switch..].iter().all(|id| *id == new));
    }
}
