use std::time::SystemTime;

use crate::exporter::model::{Error, SAMPLING_PRIORITY_KEY};
use crate::model::{SpanData, TagValue};

/// Encodes one trace as a msgpack array of span maps.
///
/// Each span is an 11-key map, or 12 with a leading `type` key when the span
/// carries a type. String and boolean tags land in `meta` together with the
/// baggage snapshot; numeric tags land in `metrics` next to the sampling
/// priority when one was decided.
pub(crate) fn encode_trace(encoded: &mut Vec<u8>, trace: &[SpanData]) -> Result<(), Error> {
    rmp::encode::write_array_len(encoded, trace.len() as u32)?;

    for span in trace {
        let start = span
            .start_time
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as i64)
            .unwrap_or(0);

        if let Some(span_type) = &span.span_type {
            rmp::encode::write_map_len(encoded, 12)?;
            rmp::encode::write_str(encoded, "type")?;
            rmp::encode::write_str(encoded, span_type)?;
        } else {
            rmp::encode::write_map_len(encoded, 11)?;
        }

        rmp::encode::write_str(encoded, "service")?;
        rmp::encode::write_str(encoded, &span.service_name)?;

        rmp::encode::write_str(encoded, "name")?;
        rmp::encode::write_str(encoded, &span.operation_name)?;

        rmp::encode::write_str(encoded, "resource")?;
        rmp::encode::write_str(encoded, &span.resource_name)?;

        // The agent payload is 64-bit; wider ids carry their low bits.
        rmp::encode::write_str(encoded, "trace_id")?;
        rmp::encode::write_u64(encoded, span.trace_id().to_u64())?;

        rmp::encode::write_str(encoded, "span_id")?;
        rmp::encode::write_u64(encoded, span.span_id().to_u64())?;

        rmp::encode::write_str(encoded, "parent_id")?;
        rmp::encode::write_u64(encoded, span.parent_id().to_u64())?;

        rmp::encode::write_str(encoded, "start")?;
        rmp::encode::write_i64(encoded, start)?;

        rmp::encode::write_str(encoded, "duration")?;
        rmp::encode::write_i64(encoded, span.duration_nanos as i64)?;

        rmp::encode::write_str(encoded, "error")?;
        rmp::encode::write_i32(encoded, i32::from(span.error))?;

        let baggage = span.context.baggage();
        let meta: Vec<(&str, String)> = baggage
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .chain(span.tags.iter().filter_map(|(key, value)| match value {
                TagValue::String(text) => Some((key.as_str(), text.clone())),
                TagValue::Bool(flag) => Some((key.as_str(), flag.to_string())),
                TagValue::Number(_) => None,
            }))
            .collect();

        rmp::encode::write_str(encoded, "meta")?;
        rmp::encode::write_map_len(encoded, meta.len() as u32)?;
        for (key, value) in &meta {
            rmp::encode::write_str(encoded, key)?;
            rmp::encode::write_str(encoded, value)?;
        }

        let priority = span.context.sampling_priority();
        let metrics: Vec<(&str, f64)> = span
            .tags
            .iter()
            .filter_map(|(key, value)| match value {
                TagValue::Number(number) => Some((key.as_str(), *number)),
                _ => None,
            })
            .chain(
                priority
                    .map(|priority| (SAMPLING_PRIORITY_KEY, f64::from(priority.as_i32()))),
            )
            .collect();

        rmp::encode::write_str(encoded, "metrics")?;
        rmp::encode::write_map_len(encoded, metrics.len() as u32)?;
        for (key, value) in &metrics {
            rmp::encode::write_str(encoded, key)?;
            rmp::encode::write_f64(encoded, *value)?;
        }
    }

    Ok(())
}
