//! Locating a page's image XObjects.
//!
//! A page's `/Resources` may be inline, an indirect object, or inherited from an
//! ancestor in the page tree, and its `/XObject` entry may again be inline or
//! indirect. [`XObjectSlot`] records where the dictionary actually lives in the
//! document's object table so it can be read and later rewritten in place.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use log::{debug, warn};

use crate::{Error, Result};

/// Page tree nodes are followed up to this depth when looking for inherited resources.
const MAX_INHERITANCE_DEPTH: usize = 64;

/// Location of an XObject dictionary: the indirect object that holds it and
/// the chain of inline dictionary keys leading to it from there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XObjectSlot {
    pub owner: ObjectId,
    pub path: Vec<&'static [u8]>,
}

impl XObjectSlot {
    pub fn dict<'a>(&self, doc: &'a Document) -> Result<&'a Dictionary> {
        let mut dict = dictionary_of(doc.get_object(self.owner)?)?;
        for key in &self.path {
            dict = dict.get(key)?.as_dict()?;
        }
        Ok(dict)
    }

    pub fn dict_mut<'a>(&self, doc: &'a mut Document) -> Result<&'a mut Dictionary> {
        let mut dict = dictionary_of_mut(doc.get_object_mut(self.owner)?)?;
        for key in &self.path {
            dict = dict.get_mut(key)?.as_dict_mut()?;
        }
        Ok(dict)
    }
}

/// An XObject dictionary entry that refers to an image XObject stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResource {
    /// Key of the entry in the XObject dictionary.
    pub key: Vec<u8>,
    /// The referenced image stream.
    pub id: ObjectId,
    /// 1-based position among the image resources of the dictionary.
    pub position: usize,
}

impl ImageResource {
    pub fn stream<'a>(&self, doc: &'a Document) -> Result<&'a Stream> {
        Ok(doc.get_object(self.id)?.as_stream()?)
    }

    /// The image's own `/Name` attribute, which is not necessarily its dictionary key.
    pub fn stored_name(&self, doc: &Document) -> Result<String> {
        stored_name(self.id, self.stream(doc)?)
    }
}

pub fn stored_name(id: ObjectId, stream: &Stream) -> Result<String> {
    stream
        .dict
        .get(b"Name")
        .and_then(Object::as_name)
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .map_err(|_| Error::MissingAttribute { id, key: "Name" })
}

/// Find the XObject dictionary in effect for a page, or `None` if the page has none.
pub fn locate_xobjects(doc: &Document, page_id: ObjectId) -> Result<Option<XObjectSlot>> {
    let mut node_id = page_id;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        let node = dictionary_of(doc.get_object(node_id)?)?;
        match node.get(b"Resources") {
            Ok(Object::Reference(resources_id)) => {
                let resources = match doc.get_object(*resources_id).and_then(Object::as_dict) {
                    Ok(resources) => resources,
                    Err(err) => {
                        warn!("resources {} {} of page node {} {}: {}", resources_id.0, resources_id.1, node_id.0, node_id.1, err);
                        return Ok(None);
                    }
                };
                return Ok(xobjects_in(resources, *resources_id, vec![]));
            }
            Ok(Object::Dictionary(resources)) => {
                return Ok(xobjects_in(resources, node_id, vec![b"Resources".as_slice()]));
            }
            Ok(other) => {
                warn!("page node {} {} has a non-dictionary Resources entry: {:?}", node_id.0, node_id.1, other);
                return Ok(None);
            }
            Err(_) => {}
        }
        match node.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent_id) => node_id = parent_id,
            Err(_) => return Ok(None),
        }
    }
    warn!("page tree deeper than {} levels above page {} {}", MAX_INHERITANCE_DEPTH, page_id.0, page_id.1);
    Ok(None)
}

fn xobjects_in(resources: &Dictionary, owner: ObjectId, mut path: Vec<&'static [u8]>) -> Option<XObjectSlot> {
    match resources.get(b"XObject") {
        Ok(Object::Reference(xobjects_id)) => Some(XObjectSlot {
            owner: *xobjects_id,
            path: vec![],
        }),
        Ok(Object::Dictionary(_)) => {
            path.push(b"XObject");
            Some(XObjectSlot { owner, path })
        }
        Ok(other) => {
            warn!("ignoring non-dictionary XObject resource entry: {:?}", other);
            None
        }
        Err(_) => None,
    }
}

/// Whether a stream dictionary declares `/Type /XObject` and `/Subtype /Image`.
pub fn is_image_xobject(dict: &Dictionary) -> bool {
    dict.get(b"Type").and_then(Object::as_name).ok() == Some(b"XObject".as_slice())
        && dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(b"Image".as_slice())
}

/// The image resources of an XObject dictionary, in dictionary order.
///
/// Only indirect references to image XObject streams qualify; inline values,
/// forms, and dangling references are skipped and do not take up a position.
pub fn image_resources(doc: &Document, xobjects: &Dictionary) -> Vec<ImageResource> {
    let mut resources = Vec::new();
    for (key, value) in xobjects.iter() {
        let Object::Reference(id) = value else {
            debug!("skipping direct XObject entry /{}", String::from_utf8_lossy(key));
            continue;
        };
        match doc.get_object(*id) {
            Ok(Object::Stream(stream)) if is_image_xobject(&stream.dict) => resources.push(ImageResource {
                key: key.clone(),
                id: *id,
                position: resources.len() + 1,
            }),
            _ => debug!("skipping non-image XObject entry /{}", String::from_utf8_lossy(key)),
        }
    }
    resources
}

fn dictionary_of(object: &Object) -> Result<&Dictionary> {
    match object {
        Object::Stream(stream) => Ok(&stream.dict),
        other => Ok(other.as_dict()?),
    }
}

fn dictionary_of_mut(object: &mut Object) -> Result<&mut Dictionary> {
    match object {
        Object::Stream(stream) => Ok(&mut stream.dict),
        other => Ok(other.as_dict_mut()?),
    }
}
