/*
 *  modes/rss.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  RSS image galleries: Tumblr and DeviantArt feeds
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;

use super::{ModeContext, ModeError};
use crate::config::FeedSettings;
use crate::display::compositor;
use crate::display::draw::placeholder_screen;
use crate::display::Canvas;

const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];
const THUMBNAIL_SIZES: [&str; 3] = ["s75x75", "s100x200", "s250x400"];
const DA_THUMBNAIL_SIZES: [&str; 7] = ["150px", "200h", "350t", "400t", "50x50", "100x100", "150x150"];
const DA_BROKEN_MARKERS: [&str; 8] =
    ["error", "placeholder", "missing", "default", "noimage", "broken", "token=", "thumbnail"];
const DA_SMALL_TRANSFORMS: [&str; 9] = ["w_50", "h_50", "w_100", "h_100", "w_150", "h_150", "50w", "100w", "150w"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Tumblr,
    DeviantArt,
}

impl FeedKind {
    pub fn label(&self) -> &'static str {
        match self {
            FeedKind::Tumblr => "Tumblr",
            FeedKind::DeviantArt => "DeviantArt",
        }
    }

    /// Image URLs of one post, best candidates first.
    pub fn image_urls(&self, item: &FeedItem) -> Vec<String> {
        let from_description = || img_sources(&item.description);
        let candidates = match self {
            FeedKind::Tumblr => from_description(),
            FeedKind::DeviantArt if !item.media.is_empty() => item.media.clone(),
            FeedKind::DeviantArt => from_description(),
        };
        candidates.into_iter().filter(|u| self.keep(u)).collect()
    }

    /// Drops thumbnails, avatars and anything that is not obviously an image.
    pub fn keep(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        if THUMBNAIL_SIZES.iter().any(|s| url.contains(s)) || lower.contains("avatar") {
            return false;
        }
        if !IMAGE_EXTENSIONS.iter().any(|ext| lower.contains(ext)) {
            return false;
        }
        match self {
            FeedKind::Tumblr => true,
            FeedKind::DeviantArt => {
                !DA_THUMBNAIL_SIZES.iter().any(|s| url.contains(s))
                    && !DA_BROKEN_MARKERS.iter().any(|m| lower.contains(m))
                    && !DA_SMALL_TRANSFORMS.iter().any(|t| url.contains(t))
            }
        }
    }
}

/// `src` values of every `<img>` tag in an HTML fragment, in document order.
pub fn img_sources(html: &str) -> Vec<String> {
    // ASCII lowering keeps byte offsets, so indices into `lower` slice `html`
    let lower = html.to_ascii_lowercase();
    let mut sources = Vec::new();
    let mut pos = 0;
    while let Some(found) = lower[pos..].find("<img") {
        let tag_start = pos + found;
        let tag_end = lower[tag_start..].find('>').map_or(lower.len(), |e| tag_start + e);
        if let Some((start, end)) = src_attribute(&lower[tag_start..tag_end]) {
            sources.push(html[tag_start + start..tag_start + end].to_string());
        }
        pos = tag_end;
    }
    sources
}

/// Byte range of a quoted `src=` value inside one tag.
fn src_attribute(tag: &str) -> Option<(usize, usize)> {
    let bytes = tag.as_bytes();
    let skip_ws = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };
    let mut from = 0;
    while let Some(found) = tag[from..].find("src") {
        let at = from + found;
        from = at + 3;
        if at == 0 || !bytes[at - 1].is_ascii_whitespace() {
            continue;
        }
        let eq = skip_ws(from);
        if bytes.get(eq) != Some(&b'=') {
            continue;
        }
        let open = skip_ws(eq + 1);
        let quote = match bytes.get(open) {
            Some(q @ (b'"' | b'\'')) => *q,
            _ => continue,
        };
        let start = open + 1;
        let end = start + tag[start..].find(quote as char)?;
        return Some((start, end));
    }
    None
}

/// One `<item>` of an RSS 2.0 feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub description: String,
    /// `media:content` urls
    pub media: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedImage {
    pub url: String,
    pub title: String,
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    Link,
    PubDate,
    Description,
}

pub fn parse_feed(xml: &[u8]) -> Result<Vec<FeedItem>, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut items = Vec::new();
    let mut item: Option<FeedItem> = None;
    let mut field: Option<Field> = None;
    let mut pub_date = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"item" => {
                    item = Some(FeedItem::default());
                    pub_date.clear();
                }
                b"title" if item.is_some() => field = Some(Field::Title),
                b"link" if item.is_some() => field = Some(Field::Link),
                b"pubDate" if item.is_some() => field = Some(Field::PubDate),
                b"description" if item.is_some() => field = Some(Field::Description),
                b"media:content" => media_url(&reader, &e, item.as_mut()),
                _ => {}
            },
            Event::Empty(e) => {
                if e.name().as_ref() == b"media:content" {
                    media_url(&reader, &e, item.as_mut());
                }
            }
            Event::Text(e) => {
                let text = match e.unescape() {
                    Ok(t) => t.into_owned(),
                    // stray HTML entities such as &nbsp;
                    Err(_) => String::from_utf8_lossy(&e).into_owned(),
                };
                append(item.as_mut(), field, &text, &mut pub_date);
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                append(item.as_mut(), field, &text, &mut pub_date);
            }
            Event::End(e) => match e.name().as_ref() {
                b"item" => {
                    if let Some(mut done) = item.take() {
                        done.published = DateTime::parse_from_rfc2822(pub_date.trim())
                            .ok()
                            .map(|d| d.with_timezone(&Utc));
                        items.push(done);
                    }
                    field = None;
                }
                b"title" | b"link" | b"pubDate" | b"description" => field = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    debug!("parsed {} feed items", items.len());
    Ok(items)
}

fn media_url(reader: &Reader<&[u8]>, e: &quick_xml::events::BytesStart<'_>, item: Option<&mut FeedItem>) {
    let Some(item) = item else { return };
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"url" {
            if let Ok(value) = reader.decoder().decode(&attr.value) {
                item.media.push(value.replace("&amp;", "&"));
            }
        }
    }
}

fn append(item: Option<&mut FeedItem>, field: Option<Field>, text: &str, pub_date: &mut String) {
    let (Some(item), Some(field)) = (item, field) else { return };
    let target = match field {
        Field::Title => &mut item.title,
        Field::Link => &mut item.link,
        Field::PubDate => pub_date,
        Field::Description => &mut item.description,
    };
    target.push_str(text);
}

/// Usable images across the feed, first occurrence wins, at most `max_posts`.
pub fn collect_images(kind: FeedKind, items: &[FeedItem], max_posts: usize) -> Vec<FeedImage> {
    let mut seen = HashSet::new();
    items
        .iter()
        .flat_map(|item| {
            kind.image_urls(item).into_iter().map(|url| FeedImage { url, title: item.title.clone() })
        })
        .filter(|img| seen.insert(img.url.clone()))
        .take(max_posts)
        .collect()
}

/// Slideshow over the images of one feed.
pub struct FeedGallery {
    kind: FeedKind,
    settings: FeedSettings,
    images: Vec<FeedImage>,
    cursor: usize,
    shown_at: Option<Instant>,
}

impl FeedGallery {
    pub fn new(kind: FeedKind, settings: FeedSettings) -> Self {
        Self { kind, settings, images: Vec::new(), cursor: 0, shown_at: None }
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    pub fn persists_cursor(&self) -> bool {
        self.settings.persist_cursor
    }

    pub fn cache_key(&self) -> String {
        format!("rss:{}", self.settings.url)
    }

    pub async fn on_enter(&mut self, ctx: &ModeContext, now: Instant) -> Result<Canvas, ModeError> {
        self.images = self.load_feed(ctx).await?;
        if self.cursor >= self.images.len() {
            self.cursor = 0;
        }
        Ok(self.render(ctx, now).await)
    }

    pub async fn on_tick(&mut self, ctx: &ModeContext, now: Instant) -> Option<Canvas> {
        let due = self
            .shown_at
            .is_none_or(|t| now.saturating_duration_since(t) >= self.settings.display_time);
        if !due {
            return None;
        }
        self.cursor += 1;
        if self.cursor >= self.images.len() {
            self.cursor = 0;
            // cache backed, so this only hits the network once update_interval has passed
            match self.load_feed(ctx).await {
                Ok(images) => self.images = images,
                Err(e) => warn!("{} feed refresh failed, keeping {} images: {}", self.kind.label(), self.images.len(), e),
            }
        }
        Some(self.render(ctx, now).await)
    }

    pub fn on_exit(&mut self) {
        self.images.clear();
        self.shown_at = None;
    }

    async fn load_feed(&self, ctx: &ModeContext) -> Result<Vec<FeedImage>, ModeError> {
        let http = &ctx.http;
        let url = self.settings.url.as_str();
        let fetched = ctx
            .cache
            .get_or_fetch(&self.cache_key(), self.settings.update_interval, || async move {
                info!("Fetching RSS feed {}", url);
                let body = http.get_bytes(url, &[] as &[(&str, &str)]).await?;
                let items = parse_feed(&body)?;
                Ok::<_, anyhow::Error>(serde_json::to_value(items)?)
            })
            .await
            .map_err(|e| ModeError::DataUnavailable(e.to_string()))?;
        if fetched.is_stale {
            warn!("Using stale {} feed from {}", self.kind.label(), fetched.fetched_at);
        }

        let items: Vec<FeedItem> =
            serde_json::from_value(fetched.payload).map_err(|e| ModeError::DataUnavailable(e.to_string()))?;
        let images = collect_images(self.kind, &items, self.settings.max_posts);
        info!("{} feed: {} posts, {} usable images", self.kind.label(), items.len(), images.len());
        if images.is_empty() {
            return Err(ModeError::NoContent(format!("no usable images in {}", self.settings.url)));
        }
        Ok(images)
    }

    /// Shows the image at the cursor, skipping ones that fail to download or decode.
    async fn render(&mut self, ctx: &ModeContext, now: Instant) -> Canvas {
        self.shown_at = Some(now);
        for _ in 0..self.images.len() {
            let image = &self.images[self.cursor];
            let fitted = match ctx.images.get(&image.url).await {
                Ok(img) => compositor::fit(&img, ctx.size, &self.settings.fit).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match fitted {
                Ok(canvas) => {
                    info!("{} image {}/{}: {}", self.kind.label(), self.cursor + 1, self.images.len(), image.title);
                    return canvas;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", image.url, e);
                    self.cursor = (self.cursor + 1) % self.images.len();
                }
            }
        }
        placeholder_screen(
            ctx.size,
            &format!("No {} Images", self.kind.label()),
            "Check the feed and the network connection",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TUMBLR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>dinosaurs</title>
<item>
  <title>Post one</title>
  <link>https://example.tumblr.com/post/1</link>
  <pubDate>Mon, 02 Mar 2026 10:00:00 +0000</pubDate>
  <description>&lt;p&gt;&lt;img src="https://64.media.tumblr.com/a/tumblr_one_1280.jpg" alt=""/&gt;&lt;img src="https://64.media.tumblr.com/avatar_x_s75x75.png"/&gt;&lt;/p&gt;</description>
</item>
<item>
  <title>Post two</title>
  <link>https://example.tumblr.com/post/2</link>
  <description><![CDATA[<img src="https://64.media.tumblr.com/b/tumblr_two_1280.png"> <img src="https://64.media.tumblr.com/a/tumblr_one_1280.jpg">]]></description>
</item>
</channel></rss>"#;

    const DEVIANTART: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/"><channel>
<item>
  <title>Harbour</title>
  <link>https://www.deviantart.com/x/art/harbour</link>
  <media:content url="https://images-wixmp.example/f/harbour.jpg" medium="image"/>
  <media:thumbnail url="https://images-wixmp.example/f/harbour_150px.jpg"/>
</item>
<item>
  <title>Broken</title>
  <media:content url="https://images-wixmp.example/f/x.jpg?token=abc" medium="image"/>
</item>
</channel></rss>"#;

    #[test]
    fn test_parse_items() {
        let items = parse_feed(TUMBLR.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Post one");
        assert_eq!(items[0].link, "https://example.tumblr.com/post/1");
        assert!(items[0].published.is_some());
        assert!(items[0].description.contains("<img src="));
        assert!(items[1].published.is_none());
    }

    #[test]
    fn test_tumblr_images_filtered_and_deduped() {
        let items = parse_feed(TUMBLR.as_bytes()).unwrap();
        let images = collect_images(FeedKind::Tumblr, &items, 300);
        let urls: Vec<&str> = images.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://64.media.tumblr.com/a/tumblr_one_1280.jpg", "https://64.media.tumblr.com/b/tumblr_two_1280.png"]
        );
        assert_eq!(collect_images(FeedKind::Tumblr, &items, 1).len(), 1);
    }

    #[test]
    fn test_deviantart_media_content() {
        let items = parse_feed(DEVIANTART.as_bytes()).unwrap();
        assert_eq!(items[0].media, vec!["https://images-wixmp.example/f/harbour.jpg".to_string()]);
        let images = collect_images(FeedKind::DeviantArt, &items, 20);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].title, "Harbour");
    }

    #[test]
    fn test_url_filters() {
        assert!(!FeedKind::Tumblr.keep("https://x/avatar_128.png"));
        assert!(!FeedKind::Tumblr.keep("https://x/page.html"));
        assert!(FeedKind::Tumblr.keep("https://x/photo.JPG"));
        assert!(!FeedKind::DeviantArt.keep("https://x/w_100,h_100/photo.jpg"));
        assert!(!FeedKind::DeviantArt.keep("https://x/noimage.png"));
        assert!(FeedKind::DeviantArt.keep("https://x/w_1280/photo.jpg"));
    }

    #[test]
    fn test_img_sources() {
        let html = r#"<p><IMG alt="a" SRC = 'https://x/one.png'><img data-src="https://x/lazy.jpg" src="https://x/two.jpg"/><img alt="none"></p>"#;
        assert_eq!(img_sources(html), vec!["https://x/one.png", "https://x/two.jpg"]);
        assert!(img_sources("no images here").is_empty());
    }
}
