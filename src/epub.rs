use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};

use log::warn;
use zip::ZipArchive;

use crate::{
    error::EpubError,
    types::{ManifestItem, SpineItem},
    utils::{
        DecodeBytes, NormalizeWhitespace, XmlElement, XmlReader, get_file_in_zip_archive,
        join_path, normalize_path, parent_dir, percent_decode,
    },
};

const CONTAINER_PATH: &str = "META-INF/container.xml";
const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// A resolved EPUB package: the archive plus its manifest and spine
///
/// `EpubPackage` is the entry point of a conversion. It locates the container
/// descriptor, follows it to the package document and resolves every manifest
/// href to the archive entry that actually holds the resource. All later stages
/// read chapter markup, stylesheets and images through it.
///
/// # Potential Issues
/// - The archive handle requires `&mut self` for every read, so reading is
///   sequential. Chapter-local work that does not touch the archive can run in
///   parallel once the bytes have been read (see [`crate::convert`]).
pub struct EpubPackage<R: Read + Seek> {
    /// The structure of the epub file that actually holds it
    pub(crate) archive: ZipArchive<R>,

    /// Names of all entries present in the archive
    entries: Vec<String>,

    /// The archive path of the package document
    pub package_path: String,

    /// The directory of the package document; manifest hrefs are relative to it
    pub base_path: String,

    /// Publication title from the package metadata, if declared
    pub title: Option<String>,

    /// All resources declared in the manifest, keyed by id
    pub manifest: HashMap<String, ManifestItem>,

    /// Reading order: the single source of truth for chapter order
    pub spine: Vec<SpineItem>,

    /// Manifest id of the legacy TOC document named by the spine's `toc` attribute
    pub toc_id: Option<String>,

    /// Manifest id named by a legacy `<meta name="cover">` element
    pub cover_id: Option<String>,
}

impl<R: Read + Seek> EpubPackage<R> {
    /// Creates a new package instance from a reader over the archive bytes
    ///
    /// # Return
    /// - `Ok(EpubPackage<R>)`: The resolved package
    /// - `Err(EpubError)`: `MissingContainer`, `MissingRootfile` or
    ///   `MissingPackage` when the package structure is absent; these abort
    ///   the whole conversion
    pub fn from_reader(reader: R) -> Result<Self, EpubError> {
        // Parsing process
        // 1. Open the archive and list its entries
        // 2. Parse `META-INF/container.xml` to get the location of the package document
        // 3. Parse the package document's manifest, spine and the few metadata we need

        let archive = ZipArchive::new(reader).map_err(EpubError::from)?;
        let entries = archive.file_names().map(str::to_string).collect::<Vec<_>>();

        let mut package = Self {
            archive,
            entries,
            package_path: String::new(),
            base_path: String::new(),
            title: None,
            manifest: HashMap::new(),
            spine: vec![],
            toc_id: None,
            cover_id: None,
        };

        let container_path = package
            .find_entry(CONTAINER_PATH)
            .ok_or(EpubError::MissingContainer)?;
        let container =
            get_file_in_zip_archive(&mut package.archive, &container_path)?.decode()?;
        let package_path = Self::parse_container(&container)?;

        let resolved_package_path =
            package
                .find_entry(&package_path)
                .ok_or_else(|| EpubError::MissingPackage {
                    path: package_path.clone(),
                })?;
        package.base_path = parent_dir(&resolved_package_path).to_string();
        package.package_path = resolved_package_path;

        let opf_file =
            get_file_in_zip_archive(&mut package.archive, &package.package_path)?.decode()?;
        let opf = XmlReader::parse(&opf_file)?;

        let manifest_element = opf.find_elements_by_name("manifest").next().ok_or_else(|| {
            EpubError::NonCanonicalFile {
                tag: "manifest".to_string(),
            }
        })?;
        let spine_element = opf.find_elements_by_name("spine").next().ok_or_else(|| {
            EpubError::NonCanonicalFile {
                tag: "spine".to_string(),
            }
        })?;

        package.parse_manifest(manifest_element);
        package.parse_spine(spine_element);
        if let Some(metadata_element) = opf.find_elements_by_name("metadata").next() {
            package.parse_metadata(metadata_element);
        }

        Ok(package)
    }

    /// Parse the EPUB container file (META-INF/container.xml)
    ///
    /// When multiple `rootfile` elements exist, the first one declaring the
    /// package media type wins, otherwise the first one overall.
    fn parse_container(data: &str) -> Result<String, EpubError> {
        let root = XmlReader::parse(data).map_err(|_| EpubError::MissingRootfile)?;
        let rootfiles = root.find_elements_by_name("rootfile").collect::<Vec<_>>();

        let rootfile = rootfiles
            .iter()
            .find(|element| element.attr("media-type") == Some(PACKAGE_MEDIA_TYPE))
            .or_else(|| rootfiles.first())
            .ok_or(EpubError::MissingRootfile)?;

        rootfile
            .attr("full-path")
            .map(|path| normalize_path(&percent_decode(path.trim())))
            .filter(|path| !path.is_empty())
            .ok_or(EpubError::MissingRootfile)
    }

    /// Parse the EPUB manifest section
    ///
    /// Items without an id or href cannot be referenced by the spine and are
    /// skipped with a warning instead of failing the package.
    fn parse_manifest(&mut self, manifest_element: &XmlElement) {
        let mut resources = HashMap::with_capacity(manifest_element.children().count());

        for element in manifest_element.find_children_by_name("item") {
            let (Some(id), Some(href)) = (element.get_attr("id"), element.get_attr("href")) else {
                warn!(
                    "Manifest item without id or href in {}, skipped.",
                    self.package_path
                );
                continue;
            };

            let mime = element.get_attr("media-type").unwrap_or_default();
            let properties = element.get_attr("properties");
            let path = self.resolve_manifest_href(&href);

            resources.insert(
                id.clone(),
                ManifestItem {
                    id,
                    path,
                    mime,
                    properties,
                },
            );
        }

        self.manifest = resources;
    }

    /// Parse the EPUB spine section
    fn parse_spine(&mut self, spine_element: &XmlElement) {
        self.toc_id = spine_element.get_attr("toc");

        let mut spine = Vec::new();
        for element in spine_element.find_children_by_name("itemref") {
            let Some(idref) = element.get_attr("idref") else {
                warn!("Spine itemref without idref, skipped.");
                continue;
            };
            let linear = element
                .attr("linear")
                .map(|linear| linear != "no")
                .unwrap_or(true);

            spine.push(SpineItem { idref, linear });
        }

        self.spine = spine;
    }

    /// Picks the publication title and the legacy cover reference from the metadata
    fn parse_metadata(&mut self, metadata_element: &XmlElement) {
        self.title = metadata_element
            .find_children_by_name("title")
            .map(|element| element.text().normalize_whitespace())
            .find(|title| !title.is_empty());

        self.cover_id = metadata_element
            .find_elements_by_name("meta")
            .find(|element| element.attr("name") == Some("cover"))
            .and_then(|element| element.get_attr("content"));
    }

    /// Resolves a manifest href to a canonical archive entry path
    ///
    /// Manifest hrefs are relative to the package document's directory.
    pub fn resolve_manifest_href(&self, href: &str) -> String {
        self.resolve_href(&self.base_path, &percent_decode(href))
    }

    /// Resolves a decoded document href found in a file under `base_dir`
    ///
    /// The href is joined to `base_dir`. A candidate that matches an entry
    /// actually present in the archive is preferred; otherwise a doubled
    /// directory prefix (`OEBPS/OEBPS/x`) is collapsed.
    pub fn resolve_href(&self, base_dir: &str, href: &str) -> String {
        let joined = join_path(base_dir, href);
        let deduplicated = dedup_directory_prefix(&joined);

        let present = [&joined, &deduplicated, &normalize_path(href)]
            .into_iter()
            .find(|candidate| self.entries.iter().any(|entry| entry == *candidate))
            .cloned();

        present.unwrap_or(deduplicated)
    }

    /// Looks up the archive entry for a path
    ///
    /// Tries an exact match, then a case-insensitive match, then an entry with
    /// the same file name anywhere in the archive.
    pub fn find_entry(&self, path: &str) -> Option<String> {
        if let Some(entry) = self.entries.iter().find(|entry| *entry == path) {
            return Some(entry.clone());
        }

        if let Some(entry) = self
            .entries
            .iter()
            .find(|entry| entry.eq_ignore_ascii_case(path))
        {
            return Some(entry.clone());
        }

        let file_name = path.rsplit('/').next().filter(|name| !name.is_empty())?;
        self.entries
            .iter()
            .find(|entry| {
                entry
                    .rsplit('/')
                    .next()
                    .is_some_and(|name| name.eq_ignore_ascii_case(file_name))
            })
            .cloned()
    }

    /// Reads the raw bytes of an archive entry
    pub fn read_entry(&mut self, path: &str) -> Result<Vec<u8>, EpubError> {
        let entry = self
            .find_entry(path)
            .ok_or_else(|| EpubError::ResourceNotFound {
                resource: path.to_string(),
            })?;

        get_file_in_zip_archive(&mut self.archive, &entry)
    }

    /// Reads an archive entry and decodes it as text
    pub fn read_text(&mut self, path: &str) -> Result<String, EpubError> {
        self.read_entry(path)?.decode()
    }

    /// Returns the manifest items of the spine, in spine order
    ///
    /// Itemrefs that point to no manifest item are skipped with a warning.
    pub fn spine_documents(&self) -> Vec<ManifestItem> {
        self.spine
            .iter()
            .filter_map(|item| {
                let resource = self.manifest.get(&item.idref);
                if resource.is_none() {
                    warn!("Spine itemref \"{}\" is not in the manifest.", item.idref);
                }
                resource.cloned()
            })
            .collect()
    }

    /// The EPUB3 navigation document, if the manifest declares one
    pub fn nav_item(&self) -> Option<&ManifestItem> {
        self.manifest.values().find(|item| item.has_property("nav"))
    }

    /// The legacy NCX document, named by the spine or found by media type
    pub fn ncx_item(&self) -> Option<&ManifestItem> {
        self.toc_id
            .as_ref()
            .and_then(|id| self.manifest.get(id))
            .or_else(|| self.manifest.values().find(|item| item.mime == NCX_MEDIA_TYPE))
    }

    /// Finds the manifest item that resolves to the given archive path
    pub fn manifest_item_by_path(&self, path: &str) -> Option<&ManifestItem> {
        self.manifest.values().find(|item| item.path == path)
    }
}

impl EpubPackage<BufReader<File>> {
    /// Opens an EPUB file from disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EpubError> {
        let file = File::open(&path).map_err(EpubError::from)?;
        Self::from_reader(BufReader::new(file))
    }
}

/// Collapses a repeated leading directory (`OEBPS/OEBPS/x` becomes `OEBPS/x`)
fn dedup_directory_prefix(path: &str) -> String {
    let segments = path.split('/').collect::<Vec<_>>();
    let mut result: Vec<&str> = Vec::with_capacity(segments.len());

    for segment in segments {
        // Only directory segments at the front are collapsed
        if result.len() == 1 && result[0] == segment {
            continue;
        }
        result.push(segment);
    }

    result.join("/")
}
