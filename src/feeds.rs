//! XML payloads: station track lists (XSPF), user feeds and the XML-RPC
//! envelope used for love/ban.

use anyhow::{Context, Result, anyhow};
use xmltree::{Element, XMLNode};

use crate::error::{ClientError, ClientResult};

/// One entry of a station playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub name: String,
    pub id: String,
    pub album: String,
    pub artist: String,
    pub location: String,
    pub duration: u64,
    pub image: String,
}

/// A friend or neighbour from a user feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub username: String,
    pub url: Option<String>,
    pub image: Option<String>,
}

fn malformed(err: impl std::fmt::Display) -> ClientError {
    ClientError::MalformedResponse(err.to_string())
}

fn parse_root(xml: &str) -> ClientResult<Element> {
    Element::parse(xml.as_bytes()).map_err(malformed)
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element
        .get_child(name)
        .and_then(Element::get_text)
        .map(|text| text.trim().to_string())
}

fn child_elements<'a>(element: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> {
    element
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .filter(move |child| name.is_empty() || child.name == name)
}

pub fn parse_xspf(xml: &str) -> ClientResult<Vec<TrackDescriptor>> {
    let root = parse_root(xml)?;
    let track_list = root
        .get_child("trackList")
        .ok_or_else(|| malformed("playlist has no trackList"))?;
    let mut tracks = Vec::new();
    for track in child_elements(track_list, "track") {
        let name = child_text(track, "title").unwrap_or_default();
        let duration = child_text(track, "duration")
            .and_then(|raw| raw.parse::<u64>().ok())
            .ok_or_else(|| malformed(format!("track {name:?} has no usable duration")))?;
        tracks.push(TrackDescriptor {
            id: child_text(track, "id").unwrap_or_default(),
            album: child_text(track, "album").unwrap_or_default(),
            artist: child_text(track, "creator").unwrap_or_default(),
            location: child_text(track, "location").unwrap_or_default(),
            image: child_text(track, "image").unwrap_or_default(),
            duration,
            name,
        });
    }
    Ok(tracks)
}

/// Friends and neighbours share a layout: one child per user carrying a
/// `username` attribute plus `url` and `image` children.
pub fn parse_profiles(xml: &str) -> ClientResult<Vec<Profile>> {
    let root = parse_root(xml)?;
    child_elements(&root, "")
        .map(|child| -> ClientResult<Profile> {
            let username = child
                .attributes
                .get("username")
                .cloned()
                .ok_or_else(|| malformed(format!("<{}> without username", child.name)))?;
            Ok(Profile {
                username,
                url: child_text(child, "url"),
                image: child_text(child, "image"),
            })
        })
        .collect()
}

fn text_element(name: &str, text: &str) -> Element {
    let mut element = Element::new(name);
    element.children.push(XMLNode::Text(text.to_string()));
    element
}

pub fn xmlrpc_request(method: &str, args: &[&str]) -> Result<String> {
    let mut params = Element::new("params");
    for arg in args {
        let mut value = Element::new("value");
        value
            .children
            .push(XMLNode::Element(text_element("string", arg)));
        let mut param = Element::new("param");
        param.children.push(XMLNode::Element(value));
        params.children.push(XMLNode::Element(param));
    }
    let mut call = Element::new("methodCall");
    call.children
        .push(XMLNode::Element(text_element("methodName", method)));
    call.children.push(XMLNode::Element(params));

    let mut body = Vec::new();
    call.write(&mut body)
        .map_err(|err| anyhow!("{err}"))
        .with_context(|| format!("Failed encoding XML-RPC call {method}"))?;
    String::from_utf8(body).context("XML-RPC call is not UTF-8")
}

fn value_text(value: &Element) -> String {
    match child_elements(value, "").next() {
        Some(typed) => typed.get_text().unwrap_or_default().trim().to_string(),
        None => value.get_text().unwrap_or_default().trim().to_string(),
    }
}

fn fault_string(fault: &Element) -> String {
    fault
        .get_child("value")
        .and_then(|value| value.get_child("struct"))
        .and_then(|members| {
            child_elements(members, "member")
                .find(|member| child_text(member, "name").as_deref() == Some("faultString"))
        })
        .and_then(|member| member.get_child("value"))
        .map(value_text)
        .unwrap_or_else(|| "unknown fault".to_string())
}

/// Extracts the single string returned by an XML-RPC method.
pub fn parse_xmlrpc_response(xml: &str) -> ClientResult<String> {
    let root = parse_root(xml)?;
    if let Some(fault) = root.get_child("fault") {
        return Err(malformed(format!("XML-RPC fault: {}", fault_string(fault))));
    }
    root.get_child("params")
        .and_then(|params| params.get_child("param"))
        .and_then(|param| param.get_child("value"))
        .map(value_text)
        .ok_or_else(|| malformed("XML-RPC response without a value"))
}
