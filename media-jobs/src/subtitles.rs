//! Transcript model and subtitle writers (SRT, WebVTT, JSON).

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Minimum duration of a cue after a timing offset is applied.
const MIN_CUE_SECS: f64 = 0.1;

/// Subtitle file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    #[default]
    Srt,
    Vtt,
    Json,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
            SubtitleFormat::Json => "json",
        }
    }
}

/// Vertical placement of burned-in subtitles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitlePosition {
    #[default]
    Bottom,
    Middle,
    Top,
}

impl SubtitlePosition {
    /// ASS numpad alignment, horizontally centred.
    fn ass_alignment(&self) -> u8 {
        match self {
            SubtitlePosition::Bottom => 2,
            SubtitlePosition::Middle => 5,
            SubtitlePosition::Top => 8,
        }
    }
}

fn default_font_size() -> u32 {
    24
}

fn default_outline() -> u32 {
    2
}

fn default_text_color() -> String {
    "#FFFFFF".to_string()
}

fn default_outline_color() -> String {
    "#000000".to_string()
}

/// Appearance of burned-in subtitles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubtitleStyle {
    #[serde(default)]
    pub font_name: Option<String>,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_outline")]
    pub outline: u32,
    #[serde(default)]
    pub position: SubtitlePosition,
    /// `#RRGGBB`.
    #[serde(default = "default_text_color")]
    pub text_color: String,
    /// `#RRGGBB`.
    #[serde(default = "default_outline_color")]
    pub outline_color: String,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_name: None,
            font_size: default_font_size(),
            outline: default_outline(),
            position: SubtitlePosition::default(),
            text_color: default_text_color(),
            outline_color: default_outline_color(),
        }
    }
}

impl SubtitleStyle {
    pub fn validate(&self) -> Result<()> {
        if !(8..=200).contains(&self.font_size) {
            return Err(Error::validation(format!(
                "style.font_size must be between 8 and 200, got {}",
                self.font_size
            )));
        }
        if self.outline > 20 {
            return Err(Error::validation(format!(
                "style.outline must be between 0 and 20, got {}",
                self.outline
            )));
        }
        if let Some(name) = &self.font_name
            && (name.is_empty() || name.contains([',', '\'', ':', '=']))
        {
            return Err(Error::validation(format!("Invalid font name: {name:?}")));
        }
        ass_colour(&self.text_color)?;
        ass_colour(&self.outline_color)?;
        Ok(())
    }

    /// Value for the `force_style` option of ffmpeg's `subtitles` filter.
    pub fn force_style(&self) -> Result<String> {
        let mut style = format!(
            "FontSize={},Outline={},Alignment={},PrimaryColour={},OutlineColour={}",
            self.font_size,
            self.outline,
            self.position.ass_alignment(),
            ass_colour(&self.text_color)?,
            ass_colour(&self.outline_color)?,
        );
        if let Some(name) = &self.font_name {
            let _ = write!(style, ",FontName={name}");
        }
        Ok(style)
    }
}

/// Convert `#RRGGBB` into ASS `&HBBGGRR` notation.
fn ass_colour(hex: &str) -> Result<String> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::validation(format!("Invalid colour: {hex:?}")));
    }
    let (r, g, b) = (&digits[0..2], &digits[2..4], &digits[4..6]);
    Ok(format!("&H00{b}{g}{r}").to_uppercase())
}

/// A single recognized word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// A timed line of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<Word>,
}

/// Output of a transcription engine for one piece of audio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub cues: Vec<Cue>,
}

impl Transcript {
    pub fn new(cues: Vec<Cue>) -> Self {
        Self {
            language: None,
            cues,
        }
    }

    /// Move every cue and word by `secs`. Used to lift segment-local times
    /// onto the source timeline.
    pub fn shift(&mut self, secs: f64) {
        for cue in &mut self.cues {
            cue.start += secs;
            cue.end += secs;
            for word in &mut cue.words {
                word.start += secs;
                word.end += secs;
            }
        }
    }

    /// Append `other`'s cues. Callers merge in segment order.
    pub fn extend(&mut self, other: Transcript) {
        if self.language.is_none() {
            self.language = other.language;
        }
        self.cues.extend(other.cues);
    }

    /// Apply a user timing offset: starts clamp at zero and every cue keeps
    /// at least a minimal duration.
    pub fn apply_timing_offset(&mut self, offset: f64) {
        if offset == 0.0 {
            return;
        }
        for cue in &mut self.cues {
            let start = (cue.start + offset).max(0.0);
            let end = (cue.end + offset).max(start + MIN_CUE_SECS);
            cue.start = start;
            cue.end = end;
            for word in &mut cue.words {
                word.start = (word.start + offset).max(0.0);
                word.end = (word.end + offset).max(word.start);
            }
        }
    }

    /// Cues overlapping `[start, end)`, cut to the window and rebased so the
    /// window begins at zero.
    pub fn slice(&self, start: f64, end: f64) -> Transcript {
        let cues = self
            .cues
            .iter()
            .filter(|c| c.end > start && c.start < end)
            .map(|c| Cue {
                start: (c.start.max(start) - start).max(0.0),
                end: c.end.min(end) - start,
                text: c.text.clone(),
                words: c
                    .words
                    .iter()
                    .filter(|w| w.end > start && w.start < end)
                    .map(|w| Word {
                        text: w.text.clone(),
                        start: (w.start.max(start) - start).max(0.0),
                        end: w.end.min(end) - start,
                    })
                    .collect(),
            })
            .collect();
        Transcript {
            language: self.language.clone(),
            cues,
        }
    }

    pub fn render(&self, format: SubtitleFormat) -> Result<String> {
        match format {
            SubtitleFormat::Srt => Ok(self.to_srt()),
            SubtitleFormat::Vtt => Ok(self.to_vtt()),
            SubtitleFormat::Json => Ok(serde_json::to_string_pretty(&self.cues)?),
        }
    }

    pub fn to_srt(&self) -> String {
        let mut out = String::new();
        for (i, cue) in self.cues.iter().enumerate() {
            let _ = write!(
                out,
                "{}\n{} --> {}\n{}\n\n",
                i + 1,
                format_timestamp(cue.start, ','),
                format_timestamp(cue.end, ','),
                cue.text.trim()
            );
        }
        out
    }

    pub fn to_vtt(&self) -> String {
        let mut out = String::from("WEBVTT\n\n");
        for cue in &self.cues {
            let _ = write!(
                out,
                "{} --> {}\n{}\n\n",
                format_timestamp(cue.start, '.'),
                format_timestamp(cue.end, '.'),
                cue.text.trim()
            );
        }
        out
    }
}

/// `HH:MM:SS<sep>mmm`.
fn format_timestamp(secs: f64, sep: char) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02}{sep}{ms:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(start: f64, end: f64, text: &str) -> Cue {
        Cue {
            start,
            end,
            text: text.to_string(),
            words: Vec::new(),
        }
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0, ','), "00:00:00,000");
        assert_eq!(format_timestamp(3661.5, ','), "01:01:01,500");
        assert_eq!(format_timestamp(59.9996, '.'), "00:01:00.000");
    }

    #[test]
    fn test_srt_output() {
        let t = Transcript::new(vec![cue(0.0, 1.5, "hello"), cue(2.0, 3.0, " world ")]);
        assert_eq!(
            t.to_srt(),
            "1\n00:00:00,000 --> 00:00:01,500\nhello\n\n2\n00:00:02,000 --> 00:00:03,000\nworld\n\n"
        );
    }

    #[test]
    fn test_vtt_output_has_header() {
        let t = Transcript::new(vec![cue(1.0, 2.0, "hi")]);
        assert_eq!(t.to_vtt(), "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nhi\n\n");
    }

    #[test]
    fn test_negative_offset_clamps() {
        let mut t = Transcript::new(vec![cue(0.5, 0.6, "a"), cue(5.0, 6.0, "b")]);
        t.apply_timing_offset(-1.0);
        assert_eq!(t.cues[0].start, 0.0);
        assert!((t.cues[0].end - MIN_CUE_SECS).abs() < 1e-9);
        assert_eq!(t.cues[1].start, 4.0);
        assert_eq!(t.cues[1].end, 5.0);
    }

    #[test]
    fn test_shift_moves_words() {
        let mut t = Transcript::new(vec![Cue {
            start: 1.0,
            end: 2.0,
            text: "x".into(),
            words: vec![Word {
                text: "x".into(),
                start: 1.0,
                end: 2.0,
            }],
        }]);
        t.shift(30.0);
        assert_eq!(t.cues[0].start, 31.0);
        assert_eq!(t.cues[0].words[0].end, 32.0);
    }

    #[test]
    fn test_slice_rebases_to_window() {
        let t = Transcript::new(vec![
            cue(10.0, 20.0, "early"),
            cue(28.0, 33.0, "straddles"),
            cue(40.0, 45.0, "late"),
        ]);
        let window = t.slice(30.0, 60.0);
        assert_eq!(window.cues.len(), 2);
        assert_eq!(window.cues[0].start, 0.0);
        assert_eq!(window.cues[0].end, 3.0);
        assert_eq!(window.cues[1].start, 10.0);
    }

    #[test]
    fn test_style_bounds() {
        let mut style = SubtitleStyle::default();
        assert!(style.validate().is_ok());
        style.font_size = 4;
        assert!(style.validate().is_err());
        style.font_size = 24;
        style.outline = 21;
        assert!(style.validate().is_err());
        style.outline = 2;
        style.text_color = "red".into();
        assert!(style.validate().is_err());
    }

    #[test]
    fn test_force_style_uses_ass_colours() {
        let style = SubtitleStyle {
            text_color: "#FF8000".into(),
            position: SubtitlePosition::Top,
            ..Default::default()
        };
        let forced = style.force_style().unwrap();
        assert!(forced.contains("PrimaryColour=&H000080FF"));
        assert!(forced.contains("Alignment=8"));
    }
}
