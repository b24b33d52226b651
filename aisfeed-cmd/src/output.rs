use std::io::Write;

use aisfeed::nmea::Message;
use aisfeed::stats::Summary;
use anyhow::{Context, Result};
use handlebars::handlebars_helper;
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

/// Write one message per line.
pub fn write_message<W: Write>(mut w: W, message: &Message, format: &Format) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer(&mut w, message).context("serializing message")?;
            writeln!(w).context("writing message")
        }
        Format::Text => writeln!(
            w,
            "{} {} {}",
            message.timestamp.to_rfc3339(),
            message.channel,
            message.payload
        )
        .context("writing message"),
    }
}

#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub source: &'a str,
    pub bytes: u64,
    pub sentences: u64,
    pub summary: &'a Summary,
}

pub fn write_report<W: Write>(mut w: W, report: &Report, format: &Format) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut w, report).context("serializing to json")?;
            writeln!(w).context("writing to stdout")
        }
        Format::Text => {
            let data = render_text(report).context("serializing summary")?;
            w.write_all(data.as_bytes()).context("writing to stdout")
        }
    }
}

fn render_text(report: &Report) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let num = usize::try_from(num).unwrap_or(0).max(v.len());
        format!("{v:>num$}")
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("summary", TEXT_TEMPLATE)
        .context("compiling template")?;

    hb.render("summary", report).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ source }}
==========================================================
Bytes:     {{ bytes }}
Sentences: {{ sentences }}
Messages:  {{ summary.count }}
Fragments: {{ summary.fragments }}
Rejected:  {{ #each summary.rejected }}{{ @key }}={{ this }}{{ #if @last }}{{ else }}, {{ /if }}{{ /each }}
----------------------------------------------------------
Channel        Messages     Fragments        Payload
----------------------------------------------------------
{{ #each summary.channels }}{{ lpad 7 @key }}  {{ lpad 15 count }}  {{ lpad 12 fragments }}  {{ lpad 13 chars }}
{{/each }}
";

#[cfg(test)]
mod tests {
    use super::*;
    use aisfeed::nmea::Pipeline;

    const TWO_PART: &[u8] = b"!AIVDM,2,1,3,B,55P5TL01VIaAL@7WKO@mBplU@<PDhh000000001S;AJ::4A80?4i@E53,0*3E\r\n\
        !AIVDM,2,2,3,B,1@0000000000000,2*55\r\n";

    #[test]
    fn text_message() {
        let message = Pipeline::default().push(TWO_PART).remove(0);
        let mut buf = Vec::new();
        write_message(&mut buf, &message, &Format::Text).unwrap();

        let line = String::from_utf8(buf).unwrap();
        assert!(line.ends_with(
            " B 55P5TL01VIaAL@7WKO@mBplU@<PDhh000000001S;AJ::4A80?4i@E531@0000000000000\n"
        ));
    }

    #[test]
    fn json_message() {
        let message = Pipeline::new("test").push(TWO_PART).remove(0);
        let mut buf = Vec::new();
        write_message(&mut buf, &message, &Format::Json).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["channel"], "B");
        assert_eq!(value["source"], "test");
        assert_eq!(value["sentences"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn text_report() {
        let mut pipeline = Pipeline::default();
        let mut summary = Summary::default();
        for message in pipeline.push(TWO_PART) {
            summary.add(&message);
        }
        let report = Report {
            source: "input.nmea",
            bytes: pipeline.bytes_received(),
            sentences: pipeline.sentences_received(),
            summary: &summary,
        };

        let mut buf = Vec::new();
        write_report(&mut buf, &report, &Format::Text).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("input.nmea\n"), "{text}");
        assert!(text.contains("Messages:  1\n"), "{text}");
        assert!(text.contains("Sentences: 2\n"), "{text}");
    }
}
