// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line format for hosts embedding the receiver.
//!
//! ```text
//! SERVICEMAP | LEVEL | [span{fields}: ]message fields
//! ```
//!
//! The prefix makes receiver output easy to pick out when it shares a log
//! stream with the host application.
//!
//! ```rust,ignore
//! let subscriber = tracing_subscriber::fmt::Subscriber::builder()
//!     .event_format(servicemap_receiver::logger::Formatter)
//!     .finish();
//! tracing::subscriber::set_global_default(subscriber)?;
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

pub const LOG_PREFIX: &str = "SERVICEMAP";

#[derive(Debug, Clone, Copy, Default)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "{} | {} | ", LOG_PREFIX, event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                // Spans created before the fmt layer was installed carry no fields
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
