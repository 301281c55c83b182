//! Async delivery of occurrences: a [`Future`] that resolves at the next
//! one, and a [`Stream`](futures::Stream) that yields them in order.
//!
//! Both ride the tokio timer directly — the engine already requires tokio,
//! so each pending occurrence is just a [`tokio::time::Sleep`] pinned inside
//! the future or stream.

use crate::expression::{Expression, Occurrences};

use chrono::{DateTime, TimeZone, Utc};
use futures::{future::FusedFuture, stream::FusedStream, Stream};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant, Sleep};

/// How an awaited occurrence arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FireEvent {
    /// The occurrence happened on time.
    Ok,
    /// The occurrence was already in the past when awaited.
    Missed,
}

/// Future that resolves at the expression's next occurrence.
///
/// Awaiting it returns a [`FireEvent`]: [`FireEvent::Missed`] when the
/// occurrence instant had already passed by the first poll, [`FireEvent::Ok`]
/// otherwise. Timing precision is that of the tokio timer, so wake-ups a few
/// milliseconds off the exact instant are expected.
///
/// # Examples
/// ```rust,no_run
/// use chronex::{Expression, FireEvent};
/// use chrono::Utc;
///
/// #[tokio::main]
/// async fn main() -> chronex::Result<()> {
///     let expression = Expression::parse("@every 2s")?;
///     let event = expression.sleep(&Utc::now()).unwrap().await;
///     assert_eq!(event, FireEvent::Ok);
///     Ok(())
/// }
/// ```
#[pin_project]
#[derive(Debug)]
pub struct ExpressionSleep {
    #[pin]
    timer: Sleep,
    engaged: bool,
    finished: Option<FireEvent>,
}

impl Future for ExpressionSleep {
    type Output = FireEvent;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Some(event) = this.finished {
            return Poll::Ready(*event);
        }

        // Ok versus Missed is decided once, at the first poll: a deadline
        // that has already passed by then was overslept, not waited out.
        if !*this.engaged {
            *this.engaged = true;
            if Instant::now() >= this.timer.deadline() {
                *this.finished = Some(FireEvent::Missed);
                return Poll::Ready(FireEvent::Missed);
            }
        }

        match this.timer.poll(cx) {
            Poll::Ready(()) => {
                *this.finished = Some(FireEvent::Ok);
                Poll::Ready(FireEvent::Ok)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedFuture for ExpressionSleep {
    #[inline]
    fn is_terminated(&self) -> bool {
        self.finished.is_some()
    }
}

/// Stream of [`FireEvent`]s, one per occurrence of the expression.
///
/// Sleeps until each occurrence is due and yields it on time; an occurrence
/// that passed between polls yields [`FireEvent::Missed`]. The stream ends
/// when the expression is exhausted (a fired `@once`, a passed `until`, a
/// reached `max`).
///
/// # Examples
/// ```rust,no_run
/// use chronex::{Expression, FireEvent};
/// use chrono::Utc;
/// use futures::stream::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> chronex::Result<()> {
///     let expression = Expression::parse("@every 2s {max:3}")?;
///     let mut stream = expression.stream(&Utc::now());
///     while let Some(event) = stream.next().await {
///         assert_eq!(event, FireEvent::Ok);
///     }
///     Ok(())
/// }
/// ```
#[pin_project]
#[derive(Debug)]
pub struct ExpressionStream {
    occurrences: Occurrences,
    /// Timer armed for the occurrence currently being awaited; `None`
    /// between occurrences.
    #[pin]
    waiting: Option<Sleep>,
    exhausted: bool,
}

impl Stream for ExpressionStream {
    type Item = FireEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.exhausted {
            return Poll::Ready(None);
        }

        loop {
            // An armed timer always wins: the occurrence it guards was
            // pulled from the iterator on an earlier poll.
            if let Some(timer) = this.waiting.as_mut().as_pin_mut() {
                return match timer.poll(cx) {
                    Poll::Ready(()) => {
                        this.waiting.set(None);
                        Poll::Ready(Some(FireEvent::Ok))
                    }
                    Poll::Pending => Poll::Pending,
                };
            }

            match this.occurrences.next() {
                Some(occurrence) => match wait_for(&occurrence) {
                    Some(wait) => this.waiting.set(Some(sleep(wait))),
                    // Consumed too late; report the miss and leave the
                    // timer unarmed so the next poll pulls the following
                    // occurrence.
                    None => return Poll::Ready(Some(FireEvent::Missed)),
                },
                None => {
                    *this.exhausted = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

impl FusedStream for ExpressionStream {
    #[inline]
    fn is_terminated(&self) -> bool {
        self.exhausted
    }
}

// Time still to wait before the occurrence; `None` when it already passed.
fn wait_for<Z: TimeZone>(occurrence: &DateTime<Z>) -> Option<Duration> {
    (occurrence.with_timezone(&Utc) - Utc::now()).to_std().ok()
}

impl Expression {
    /// Future that sleeps until the next occurrence after `current`;
    /// `None` when the expression has no upcoming occurrence.
    ///
    /// The deadline is anchored when the future is created, relative to
    /// `current`. See [`ExpressionSleep`].
    pub fn sleep<Z: TimeZone>(&self, current: &DateTime<Z>) -> Option<ExpressionSleep> {
        let next = self.next_occurrence(current)?;
        let wait = (next.with_timezone(&Utc) - current.with_timezone(&Utc))
            .to_std()
            .unwrap_or(Duration::ZERO);
        Some(ExpressionSleep {
            timer: sleep_until(Instant::now() + wait),
            engaged: false,
            finished: None,
        })
    }

    /// Stream of upcoming occurrences as [`FireEvent`]s.
    ///
    /// See [`ExpressionStream`].
    pub fn stream<Z: TimeZone>(&self, current: &DateTime<Z>) -> ExpressionStream {
        ExpressionStream {
            occurrences: self.occurrences(current),
            waiting: None,
            exhausted: false,
        }
    }

    /// The same as [`Expression::stream`] but consumes the expression.
    pub fn into_stream<Z: TimeZone>(self, current: &DateTime<Z>) -> ExpressionStream {
        ExpressionStream {
            occurrences: self.into_occurrences(current),
            waiting: None,
            exhausted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rstest::rstest;

    #[tokio::test]
    #[rstest]
    #[timeout(Duration::from_secs(5))]
    async fn sleep_resolves_on_time() {
        let expression = Expression::parse("@every 1s").unwrap();
        let started = std::time::Instant::now();
        let event = expression.sleep(&Utc::now()).unwrap().await;
        assert_eq!(event, FireEvent::Ok);
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    #[rstest]
    #[timeout(Duration::from_secs(5))]
    async fn sleep_reports_missed_when_overslept() {
        let expression = Expression::parse("@every 1s").unwrap();
        let sleep = expression.sleep(&Utc::now()).unwrap();
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(sleep.await, FireEvent::Missed);
    }

    #[tokio::test]
    #[rstest]
    #[timeout(Duration::from_secs(3))]
    async fn sleep_none_when_exhausted() {
        let expression = Expression::parse("@once 2020-01-01T00:00:00Z").unwrap();
        assert!(expression.sleep(&Utc::now()).is_none());
    }

    #[tokio::test]
    #[rstest]
    #[timeout(Duration::from_secs(10))]
    async fn stream_yields_capped_count_then_ends() {
        let expression = Expression::parse("@every 1s {max:3}").unwrap();
        let events: Vec<_> = expression.into_stream(&Utc::now()).collect().await;
        assert_eq!(events, vec![FireEvent::Ok; 3]);
    }

    #[tokio::test]
    #[rstest]
    #[timeout(Duration::from_secs(5))]
    async fn stream_reports_missed_for_backlog() {
        // Start three intervals in the past: the first occurrences are
        // already behind the wall clock and come out as misses.
        let expression = Expression::parse("@every 1s").unwrap();
        let from = Utc::now() - chrono::TimeDelta::seconds(3);
        let mut stream = Box::pin(expression.stream(&from));
        assert_eq!(stream.next().await, Some(FireEvent::Missed));
        assert_eq!(stream.next().await, Some(FireEvent::Missed));
    }

    #[tokio::test]
    #[rstest]
    #[timeout(Duration::from_secs(5))]
    async fn stream_is_terminated_after_end() {
        // The only occurrence is already in the past relative to the wall
        // clock: one miss, then the stream ends.
        let expression = Expression::parse("@once 2020-01-01T00:00:00Z").unwrap();
        let from = DateTime::parse_from_rfc3339("2019-12-31T23:59:59Z").unwrap();
        let mut stream = Box::pin(expression.stream(&from));
        assert!(!stream.is_terminated());

        assert_eq!(stream.next().await, Some(FireEvent::Missed));
        assert_eq!(stream.next().await, None);
        assert!(stream.is_terminated());
        assert_eq!(stream.next().await, None);
    }
}
