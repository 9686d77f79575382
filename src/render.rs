//! Turning positions into line segments on some drawing surface.
//!
//! Nothing here knows how to actually draw. A [StrokeSink] receives lines in
//! target space and does with them what it likes.

use crate::coordinates::Transform;
use crate::position::{DeviceInfo, PositionSample};
use crate::telemetry::PositionObserver;
use crate::trace_record::{PenMode, PenStyle, TraceRecord};
use std::{collections::HashMap, sync::Mutex};

/// Colour the eraser paints with.
pub const ERASER_COLOR: &str = "#FFFFFF";

/// What a line is actually drawn with.
#[derive(Debug, Clone, PartialEq)]
pub struct Paint {
    /// CSS style colour, e.g. `#FF0000`.
    pub color: String,
    /// Opacity, 0 to 1.
    pub alpha: f64,
    /// Line width in target-space pixels.
    pub line_width: f64,
}

impl From<&PenStyle> for Paint {
    fn from(style: &PenStyle) -> Self {
        match style.mode {
            PenMode::Pen => Paint {
                color: style.color.clone(),
                alpha: style.alpha,
                line_width: style.line_width,
            },
            PenMode::Eraser => Paint {
                color: ERASER_COLOR.to_owned(),
                alpha: 1.0,
                line_width: style.line_width,
            },
        }
    }
}

/// A drawing surface.
pub trait StrokeSink {
    /// Wipe everything drawn so far.
    fn clear(&mut self);
    /// Draw a line between two target-space points.
    fn line(&mut self, from: (f64, f64), to: (f64, f64), paint: &Paint);
    /// The current stroke is over; the next line starts a new one.
    fn finish_stroke(&mut self);
}

/// One line of a replayed trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Start point in target space.
    pub from: (f64, f64),
    /// End point in target space.
    pub to: (f64, f64),
    /// Style of the later record.
    pub paint: Paint,
    /// `to` is the last point of its stroke.
    pub ends_stroke: bool,
}

/// Segments of `records[..=index]`, as a replay slider at `index` shows
/// them. Record `i` is joined to record `i - 1` unless `i - 1` ended a
/// stroke; each segment is painted with the style of its end point.
pub fn segments_up_to(records: &[TraceRecord], index: usize, transform: &Transform) -> Vec<Segment> {
    let Some(last) = records.len().checked_sub(1) else {
        return Vec::new();
    };
    let points: Vec<(f64, f64)> = records[..=index.min(last)]
        .iter()
        .map(|r| transform.sample_to_target(&r.to_sample()))
        .collect();

    (1..points.len())
        .filter(|&i| !records[i - 1].metadata.is_end_of_line)
        .map(|i| Segment {
            from: points[i - 1],
            to: points[i],
            paint: Paint::from(&records[i].pen_style),
            ends_stroke: records[i].metadata.is_end_of_line,
        })
        .collect()
}

/// Clear `sink` and draw the trace up to `index`.
pub fn draw_up_to(
    sink: &mut impl StrokeSink,
    records: &[TraceRecord],
    index: usize,
    transform: &Transform,
) {
    sink.clear();
    for segment in segments_up_to(records, index, transform) {
        sink.line(segment.from, segment.to, &segment.paint);
        if segment.ends_stroke {
            sink.finish_stroke();
        }
    }
}

/// Draws telemetry as it arrives: each reading is joined to the previous
/// one from the same cube, and a lost position ends the stroke.
pub struct LiveRenderer<K: StrokeSink + Send> {
    sink: Mutex<K>,
    transform: Mutex<Transform>,
    pen_style: Mutex<PenStyle>,
    previous: Mutex<HashMap<String, (f64, f64)>>,
}

impl<K: StrokeSink + Send> LiveRenderer<K> {
    /// A renderer drawing into `sink`.
    pub fn new(sink: K, transform: Transform) -> Self {
        Self {
            sink: Mutex::new(sink),
            transform: Mutex::new(transform),
            pen_style: Mutex::new(PenStyle::default()),
            previous: Mutex::new(HashMap::new()),
        }
    }

    /// Style used for lines drawn from now on.
    pub fn set_pen_style(&self, pen_style: PenStyle) {
        *self.pen_style.lock().unwrap() = pen_style;
    }

    /// Swap the transform, e.g. after the drawing area was resized. Strokes in
    /// progress restart at their next reading.
    pub fn set_transform(&self, transform: Transform) {
        *self.transform.lock().unwrap() = transform;
        self.previous.lock().unwrap().clear();
    }

    /// Run `f` against the sink.
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut K) -> R) -> R {
        f(&mut self.sink.lock().unwrap())
    }

    /// Take the sink back.
    pub fn into_sink(self) -> K {
        self.sink.into_inner().unwrap()
    }
}

impl<K: StrokeSink + Send> PositionObserver for LiveRenderer<K> {
    fn on_position_updated(&self, sample: &PositionSample) {
        let point = self.transform.lock().unwrap().sample_to_target(sample);
        let previous = self
            .previous
            .lock()
            .unwrap()
            .insert(sample.device_id.clone(), point);
        if let Some(from) = previous {
            let paint = Paint::from(&*self.pen_style.lock().unwrap());
            self.sink.lock().unwrap().line(from, point, &paint);
        }
    }

    fn on_position_lost(&self, device: &DeviceInfo) {
        if self.previous.lock().unwrap().remove(&device.device_id).is_some() {
            self.sink.lock().unwrap().finish_stroke();
        }
    }
}
