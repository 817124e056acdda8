//! The relay-side client against a scripted relay.
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use empath_proxy::{
    config::Timeouts,
    error::UpstreamError,
    status::EnhancedCode,
    upstream::{ClientSettings, Upstream, UpstreamClient},
};
use pretty_assertions::assert_eq;
use support::MockRelay;
use tokio::io::AsyncWriteExt;

fn settings() -> ClientSettings {
    ClientSettings {
        local_name: String::from("proxy.test"),
        server_name: String::from("127.0.0.1"),
        accept_invalid_certs: false,
        timeouts: Timeouts::default(),
    }
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_ehlo_capabilities() {
    let relay = MockRelay::builder().with_capability("STARTTLS").build().await;
    let mut client = UpstreamClient::connect(&relay.addr().to_string(), settings())
        .await
        .unwrap();

    assert_eq!(client.greeting().to_string(), "220 relay.test ESMTP");

    let reply = client.hello().await.unwrap();
    assert_eq!(reply.to_string(), "250 relay.test");
    assert!(client.capabilities().has("STARTTLS"));
    assert_eq!(client.capabilities().get("SIZE"), Some("1000000"));
    assert!(!client.is_tls());
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_helo_fallback() {
    let relay = MockRelay::builder().without_ehlo().build().await;
    let mut client = UpstreamClient::connect(&relay.addr().to_string(), settings())
        .await
        .unwrap();

    let reply = client.hello().await.unwrap();
    assert_eq!(reply.code, 250);
    assert!(client.capabilities().is_empty());
    assert_eq!(relay.lines().await, ["EHLO proxy.test", "HELO proxy.test"]);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_greeting_refused() {
    let relay = MockRelay::builder()
        .with_greeting(554, "5.3.2 No service here")
        .build()
        .await;

    let Err(UpstreamError::Rejected(reply)) =
        UpstreamClient::connect(&relay.addr().to_string(), settings()).await
    else {
        panic!("expected the greeting to be refused");
    };

    assert_eq!(reply.code, 554);
    assert_eq!(reply.enhanced, Some(EnhancedCode::new(5, 3, 2)));
    assert_eq!(reply.message, "No service here");
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_refused_starttls() {
    let relay = MockRelay::builder().with_capability("STARTTLS").build().await;
    let mut client = UpstreamClient::connect(&relay.addr().to_string(), settings())
        .await
        .unwrap();
    client.hello().await.unwrap();

    let Err(UpstreamError::Rejected(reply)) = client.starttls().await else {
        panic!("expected STARTTLS to be refused");
    };
    assert_eq!(reply.to_string(), "454 4.7.0 TLS not available");
    assert!(!client.is_tls());
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_transaction() {
    let relay = MockRelay::builder()
        .rejecting_recipient("nobody@example.com")
        .build()
        .await;
    let mut client = UpstreamClient::connect(&relay.addr().to_string(), settings())
        .await
        .unwrap();
    client.hello().await.unwrap();

    client.command(250, "MAIL FROM:<a@example.com>").await.unwrap();

    let Err(UpstreamError::Rejected(reply)) = client.command(25, "RCPT TO:<nobody@example.com>").await
    else {
        panic!("expected the recipient to be rejected");
    };
    assert_eq!(reply.to_string(), "550 5.1.1 No such user");

    client.command(25, "RCPT TO:<b@example.com>").await.unwrap();

    let (mut writer, reply) = client.data().await.unwrap();
    assert_eq!(reply.code, 354);
    assert!(client.data_reply().is_none());

    writer.write_all(b".hidden\r\nbare\nlast").await.unwrap();
    let verdict = client.finish_data(writer).await.unwrap();

    assert_eq!(verdict.to_string(), "250 2.0.0 Ok: queued as ABC123");
    assert_eq!(client.data_reply(), Some(&verdict));
    assert_eq!(relay.messages().await, [".hidden\r\nbare\r\nlast\r\n"]);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_quit_is_idempotent() {
    let relay = MockRelay::builder().build().await;
    let mut client = UpstreamClient::connect(&relay.addr().to_string(), settings())
        .await
        .unwrap();

    client.quit().await.unwrap();
    client.quit().await.unwrap();

    assert_eq!(relay.lines().await, ["QUIT"]);
    assert!(matches!(
        client.command(250, "NOOP").await,
        Err(UpstreamError::ConnectionClosed)
    ));
}
