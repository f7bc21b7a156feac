use bar_core::{Color, Module, Output, Segment, Sink};
use bar_netlink::{Link, OperState, Subscription};
use futures::future::BoxFuture;

const DIM: Color = Color::rgb(0x88, 0x88, 0x88);

/// Network link state and primary address.
///
/// Follows one interface by name, or whichever link is currently best.
#[derive(Debug, Clone, Default)]
pub struct LinkModule {
    name: Option<String>,
}

impl LinkModule {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// The best link on the system, hidden when there is none.
    pub fn any() -> Self {
        Self::default()
    }
}

impl Module for LinkModule {
    fn stream(&self, sink: Sink) -> BoxFuture<'static, anyhow::Result<()>> {
        match &self.name {
            Some(name) => Box::pin(follow(bar_netlink::by_name(name), sink, |l| render(Some(&l)))),
            None => Box::pin(follow(bar_netlink::any(), sink, |l| render(l.as_ref()))),
        }
    }
}

async fn follow<T: Clone>(
    mut sub: Subscription<T>,
    sink: Sink,
    render: impl Fn(T) -> Output,
) -> anyhow::Result<()> {
    loop {
        sink.output(render(sub.get_and_mark()));
        if !sub.next().await {
            return Ok(());
        }
    }
}

pub(crate) fn render(link: Option<&Link>) -> Output {
    let Some(link) = link else {
        return Output::Empty;
    };
    let text = match (link.state, link.primary_ip()) {
        (OperState::Up, Some(ip)) => format!("{}: {ip}", link.name),
        (state, _) => format!("{}: {state}", link.name),
    };
    let segment = Segment::text(text).short_text(link.name.clone());
    match link.state {
        OperState::Up => segment.into(),
        OperState::Gone | OperState::NotPresent => segment.color(DIM).into(),
        _ => segment.color(Color::RED).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bar_core::Value;
    use bar_netlink::LinkUpdate;
    use std::time::{Duration, UNIX_EPOCH};

    fn text(value: &Value<Output>) -> Option<String> {
        let segs = value.get().materialize(UNIX_EPOCH);
        segs.first().map(|s| s.content().as_str().to_string())
    }

    async fn wait_for(value: &Value<Output>, want: Option<&str>) {
        for _ in 0..200 {
            if text(value).as_deref() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("wanted {want:?}, still showing {:?}", text(value));
    }

    #[test]
    fn rendering() {
        let mut eth = Link::new("eth0").with_state(OperState::Up);
        eth.ips.push("10.0.0.2".parse().unwrap());
        let segs = render(Some(&eth)).materialize(UNIX_EPOCH);
        assert_eq!(segs[0].content().as_str(), "eth0: 10.0.0.2");
        assert_eq!(segs[0].get_short_text(), Some("eth0"));
        assert!(segs[0].attrs().color.is_none());

        let down = Link::new("wlan0").with_state(OperState::Down);
        let segs = render(Some(&down)).materialize(UNIX_EPOCH);
        assert_eq!(segs[0].content().as_str(), "wlan0: down");
        assert_eq!(segs[0].attrs().color, Some(Color::RED));

        assert!(render(None).materialize(UNIX_EPOCH).is_empty());
    }

    #[tokio::test]
    async fn follows_a_named_link() {
        let tester = bar_netlink::test_mode();
        let (sink, value) = Sink::recording();
        let task = tokio::spawn(LinkModule::named("eth0").stream(sink));
        wait_for(&value, Some("eth0: gone")).await;

        let index = tester.add_link(Link::new("eth0").with_state(OperState::Down));
        wait_for(&value, Some("eth0: down")).await;

        tester.update_link(
            index,
            LinkUpdate {
                state: Some(OperState::Up),
                ..LinkUpdate::default()
            },
        );
        tester.add_ip(index, "192.168.1.5".parse().unwrap());
        wait_for(&value, Some("eth0: 192.168.1.5")).await;

        task.abort();
        bar_netlink::exit_test_mode();
    }

    #[tokio::test]
    async fn any_hides_without_links() {
        let tester = bar_netlink::test_mode();
        let (sink, value) = Sink::recording();
        let task = tokio::spawn(LinkModule::any().stream(sink));
        wait_for(&value, None).await;

        let index = tester.add_link(Link::new("eno1").with_state(OperState::Up));
        wait_for(&value, Some("eno1: up")).await;
        tester.remove_link(index);
        wait_for(&value, None).await;

        task.abort();
        bar_netlink::exit_test_mode();
    }
}
