use chrono::{DateTime, Utc};
use common::domain::{floor_tenths, Envelope, HopRecord, RequestContext};

/// Clone of `envelope` with one hop record appended
///
/// The hop starts at `ctx.starttime` and ends at `now`. Latency is measured
/// from the previous hop's end, zero for the first hop.
pub fn update_history(ctx: &RequestContext, envelope: &Envelope, now: DateTime<Utc>) -> Envelope {
    let timestamp = ctx.starttime;
    let end = now.max(timestamp);
    let latency = envelope
        .history
        .last()
        .map(|previous| floor_tenths(timestamp - previous.end))
        .unwrap_or(0.0);

    let mut updated = envelope.clone();
    updated.history.push(HopRecord {
        timestamp,
        end,
        duration: floor_tenths(end - timestamp),
        latency,
        source: ctx.source.clone(),
        stage_name: ctx.stage_name.clone(),
    });
    updated
}
