//! Publish-side callbacks (§4.9), fired on the channel thread.

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect { up: bool },
    /// The peer granted an interactive open for `ticker` (§4.9 "Interactive
    /// mode"); the application must call `PublishChannel::publish` (or
    /// `pub_error`) before further images for this ticker are accepted.
    PubOpen { ticker: String, tag: u64 },
    PubClose { ticker: String },
    OpenBds { bds_name: String },
    CloseBds { bds_name: String },
    SymListQuery { n: u32 },
    RefreshImage { ticker: String, tag: u64 },
    /// Outbound queue crossed the hi watermark (§4.4/§4.9); fired once per
    /// crossing, matching `rt_socket::WatermarkEvent::Hi`.
    Overflow,
    Idle,
    Error { fatal: bool, reason: String },
}

pub trait Callbacks: Send {
    fn on_connect(&mut self, _up: bool) {}
    fn on_pub_open(&mut self, _ticker: &str, _tag: u64) {}
    fn on_pub_close(&mut self, _ticker: &str) {}
    fn on_open_bds(&mut self, _bds_name: &str) {}
    fn on_close_bds(&mut self, _bds_name: &str) {}
    fn on_sym_list_query(&mut self, _n: u32) {}
    fn on_refresh_image(&mut self, _ticker: &str, _tag: u64) {}
    fn on_overflow(&mut self) {}
    fn on_idle(&mut self) {}
    fn on_error(&mut self, _fatal: bool, _reason: &str) {}
}

pub fn dispatch(evt: &Event, cb: &mut dyn Callbacks) {
    match evt {
        Event::Connect { up } => cb.on_connect(*up),
        Event::PubOpen { ticker, tag } => cb.on_pub_open(ticker, *tag),
        Event::PubClose { ticker } => cb.on_pub_close(ticker),
        Event::OpenBds { bds_name } => cb.on_open_bds(bds_name),
        Event::CloseBds { bds_name } => cb.on_close_bds(bds_name),
        Event::SymListQuery { n } => cb.on_sym_list_query(*n),
        Event::RefreshImage { ticker, tag } => cb.on_refresh_image(ticker, *tag),
        Event::Overflow => cb.on_overflow(),
        Event::Idle => cb.on_idle(),
        Event::Error { fatal, reason } => cb.on_error(*fatal, reason),
    }
}
