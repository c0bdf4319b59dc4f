#[cfg(test)]
mod registry_tests {
    use serenity::all::{ChannelId, GuildId};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::errors::{JoinError, SessionError};
    use crate::registry::{DestroyReason, SessionRegistry};
    use crate::retry::RetryPolicy;
    use crate::session::{Enqueued, SessionConfig};
    use crate::sink::VoiceGateway;
    use crate::test::fakes::{quiet_config, track, FakeDecoder, FakeGateway, FakeNotifier, Posted};

    struct Setup {
        registry: Arc<SessionRegistry>,
        gateway: Arc<FakeGateway>,
        decoder: Arc<FakeDecoder>,
        notifier: Arc<FakeNotifier>,
    }

    fn setup(gateway: FakeGateway, config: SessionConfig) -> Setup {
        let gateway = Arc::new(gateway);
        let decoder = Arc::new(FakeDecoder::default());
        let notifier = Arc::new(FakeNotifier::default());
        let registry = SessionRegistry::with_join_policy(
            gateway.clone(),
            decoder.clone(),
            notifier.clone(),
            config,
            RetryPolicy::new(5, Duration::from_millis(1), 2.0),
        );
        Setup {
            registry,
            gateway,
            decoder,
            notifier,
        }
    }

    const GUILD: GuildId = GuildId::new(7);
    const VOICE: ChannelId = ChannelId::new(70);
    const TEXT: ChannelId = ChannelId::new(71);

    #[tokio::test]
    async fn test_concurrent_get_or_create_connects_once() {
        let s = setup(FakeGateway::with_delay(Duration::from_millis(20)), quiet_config());

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let registry = s.registry.clone();
                tokio::spawn(async move { registry.get_or_create(GUILD, VOICE, TEXT).await })
            })
            .collect();
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(s.gateway.connects(), vec![(GUILD, VOICE)]);
        assert_eq!(s.registry.len(), 1);
        assert!(handles.iter().all(|h| h.same_session(&handles[0])));
    }

    #[tokio::test]
    async fn test_get_or_create_moves_to_new_channel() {
        let s = setup(FakeGateway::default(), quiet_config());
        let first = s.registry.get_or_create(GUILD, VOICE, TEXT).await.unwrap();

        let other = ChannelId::new(72);
        let second = s.registry.get_or_create(GUILD, other, TEXT).await.unwrap();

        assert!(first.same_session(&second));
        assert_eq!(s.gateway.connects(), vec![(GUILD, VOICE), (GUILD, other)]);
        assert_eq!(s.registry.voice_channel(GUILD), Some(other));
    }

    #[tokio::test]
    async fn test_join_retries_transient_failures() {
        let s = setup(FakeGateway::default(), quiet_config());
        s.gateway.fail_next(2);

        s.registry.get_or_create(GUILD, VOICE, TEXT).await.unwrap();

        assert_eq!(s.gateway.connects().len(), 3);
        assert!(s.registry.get(GUILD).is_some());
    }

    #[tokio::test]
    async fn test_join_exhausted_leaves_no_session() {
        let s = setup(FakeGateway::default(), quiet_config());
        s.gateway.fail_next(10);

        let err = s.registry.get_or_create(GUILD, VOICE, TEXT).await.unwrap_err();

        assert!(matches!(err, JoinError::Exhausted { attempts: 5, .. }));
        assert_eq!(s.gateway.connects().len(), 5);
        assert!(s.registry.is_empty());
        // The half-open call from the failed join is released.
        assert_eq!(s.gateway.disconnects(), 1);
        assert!(!s.gateway.has_call(GUILD));
    }

    #[tokio::test]
    async fn test_leave_without_session_drops_stray_call() {
        let s = setup(FakeGateway::default(), quiet_config());
        s.gateway.connect(GUILD, VOICE).await.unwrap();

        assert!(!s.registry.destroy(GUILD, DestroyReason::Leave).await);

        assert_eq!(s.gateway.disconnects(), 1);
        assert!(!s.gateway.has_call(GUILD));
    }

    #[tokio::test]
    async fn test_play_creates_session_and_enqueues() {
        let s = setup(FakeGateway::default(), quiet_config());

        let first = s.registry.play(GUILD, VOICE, TEXT, track("a")).await.unwrap();
        let second = s.registry.play(GUILD, VOICE, TEXT, track("b")).await.unwrap();

        assert_eq!(first, Enqueued::Started);
        assert_eq!(second, Enqueued::Queued(1));
        assert_eq!(s.gateway.connects().len(), 1);
        assert_eq!(s.decoder.started(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_idle_destroy_spares_busy_session() {
        let s = setup(FakeGateway::default(), quiet_config());
        s.registry.play(GUILD, VOICE, TEXT, track("a")).await.unwrap();

        assert!(!s.registry.destroy(GUILD, DestroyReason::Idle).await);

        assert_eq!(s.registry.len(), 1);
        assert_eq!(s.gateway.disconnects(), 0);
        assert_eq!(s.decoder.live(), 1);

        // Once idle again it goes.
        s.registry.get(GUILD).unwrap().stop().await.unwrap();
        assert!(s.registry.destroy(GUILD, DestroyReason::Idle).await);
        assert!(s.registry.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_stops_decode_and_disconnects() {
        let s = setup(FakeGateway::default(), quiet_config());
        let session = s.registry.get_or_create(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue(track("songA")).await.unwrap();
        assert_eq!(s.decoder.live(), 1);

        assert!(s.registry.destroy(GUILD, DestroyReason::Leave).await);

        assert_eq!(s.decoder.live(), 0);
        assert_eq!(s.decoder.stops(), 1);
        assert_eq!(s.gateway.disconnects(), 1);
        assert!(s.registry.get(GUILD).is_none());
        assert_eq!(s.registry.voice_channel(GUILD), None);
        assert_eq!(session.snapshot().await.unwrap_err(), SessionError::Closed);

        // Destroying again is a no-op.
        assert!(!s.registry.destroy(GUILD, DestroyReason::Leave).await);
        assert_eq!(s.gateway.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_recreate_after_destroy() {
        let s = setup(FakeGateway::default(), quiet_config());
        let first = s.registry.get_or_create(GUILD, VOICE, TEXT).await.unwrap();
        s.registry.destroy(GUILD, DestroyReason::ChannelEmpty).await;

        let second = s.registry.get_or_create(GUILD, VOICE, TEXT).await.unwrap();

        assert!(!first.same_session(&second));
        assert_eq!(s.gateway.connects().len(), 2);
        assert_eq!(s.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_destroys_everything() {
        let s = setup(FakeGateway::default(), quiet_config());
        for id in 1..=3 {
            let session = s
                .registry
                .get_or_create(GuildId::new(id), ChannelId::new(100 + id), TEXT)
                .await
                .unwrap();
            session.enqueue(track(&format!("song{id}"))).await.unwrap();
        }
        assert_eq!(s.decoder.live(), 3);

        s.registry.shutdown().await;

        assert!(s.registry.is_empty());
        assert_eq!(s.decoder.live(), 0);
        assert_eq!(s.gateway.disconnects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_reaped() {
        let config = SessionConfig {
            idle_timeout: Some(Duration::from_secs(300)),
            ..quiet_config()
        };
        let s = setup(FakeGateway::default(), config);
        s.registry.get_or_create(GUILD, VOICE, TEXT).await.unwrap();

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(s.registry.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        for _ in 0..100 {
            if s.registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(s.registry.is_empty());
        assert_eq!(s.gateway.disconnects(), 1);
        assert!(s
            .notifier
            .posted()
            .contains(&Posted::Notice("Leaving the voice channel due to inactivity.".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_playing_session_is_not_reaped() {
        let config = SessionConfig {
            idle_timeout: Some(Duration::from_secs(300)),
            ..quiet_config()
        };
        let s = setup(FakeGateway::default(), config);
        let session = s.registry.get_or_create(GUILD, VOICE, TEXT).await.unwrap();
        session.enqueue(track("long mix")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(900)).await;

        assert_eq!(s.registry.len(), 1);
        assert_eq!(s.gateway.disconnects(), 0);
    }

    #[tokio::test]
    async fn test_guilds_are_independent() {
        let s = setup(FakeGateway::default(), quiet_config());
        let a = s
            .registry
            .get_or_create(GuildId::new(1), ChannelId::new(11), TEXT)
            .await
            .unwrap();
        let b = s
            .registry
            .get_or_create(GuildId::new(2), ChannelId::new(22), TEXT)
            .await
            .unwrap();
        a.enqueue(track("a1")).await.unwrap();
        b.enqueue(track("b1")).await.unwrap();

        a.stop().await.unwrap();
        s.registry.destroy(GuildId::new(1), DestroyReason::Leave).await;

        let snapshot = b.snapshot().await.unwrap();
        assert_eq!(snapshot.current.map(|t| t.title).as_deref(), Some("b1"));
        assert_eq!(s.registry.len(), 1);
    }
}
