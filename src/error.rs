//! Error Type Definition Module
//!
//! This module defines the error types that may be encountered while converting
//! an EPUB publication into plain text. All errors are uniformly wrapped in the
//! `EpubError` enumeration for convenient error handling by the caller.
//!
//! Only a handful of errors abort a whole conversion: a missing container
//! descriptor, a missing package document, or a container without a rootfile
//! path. Everything that goes wrong inside a single chapter is logged and the
//! chapter degrades instead (see [`crate::convert`]).

use thiserror::Error;

/// Types of errors that can occur during EPUB conversion
#[derive(Debug, Error)]
pub enum EpubError {
    /// ZIP archive related errors
    ///
    /// Errors occur when processing the ZIP structure of EPUB files,
    /// such as file corruption, unreadability, etc.
    #[error("Archive error: {source}")]
    ArchiveError { source: zip::result::ZipError },

    /// The conversion was cancelled by the caller
    ///
    /// Cancellation is a terminal state rather than a failure: all partial
    /// output is discarded and no file is produced.
    #[error("Cancelled: The conversion was cancelled before it completed.")]
    Cancelled,

    /// Data Decoding Error - Null data
    ///
    /// This error occurs when trying to decode an empty stream.
    #[error("Decode error: The data is empty.")]
    EmptyDataError,

    /// XML parsing failure error
    ///
    /// This error usually only occurs when the event listener ends abnormally,
    /// resulting in the root node not being initialized.
    #[error(
        "Failed parsing XML error: Unknown problems occurred during XML parsing, causing parsing failure."
    )]
    FailedParsingXml,

    #[error("IO error: {source}")]
    IOError { source: std::io::Error },

    /// The `META-INF/container.xml` descriptor is absent from the archive
    #[error("Missing container: The \"META-INF/container.xml\" file was not found.")]
    MissingContainer,

    /// The package document named by the container is absent from the archive
    #[error("Missing package: The package document \"{path}\" was not found.")]
    MissingPackage { path: String },

    /// Missing required attribute error
    ///
    /// Triggered when an XML element in an EPUB file lacks an attribute
    /// the conversion cannot do without.
    #[error(
        "Missing required attribute: The \"{attribute}\" attribute is a must attribute for the \"{tag}\" element."
    )]
    MissingRequiredAttribute { tag: String, attribute: String },

    /// The container descriptor names no rootfile path
    #[error("Missing rootfile: The container does not declare a rootfile full-path.")]
    MissingRootfile,

    /// Non-canonical file structure error
    ///
    /// This error is triggered when required XML elements are
    /// missing from a document of the EPUB file.
    #[error("Non-canonical file: The \"{tag}\" elements was not found.")]
    NonCanonicalFile { tag: String },

    /// Unable to find the resource error
    ///
    /// This error occurs when an attempt is made to get a resource
    /// but it does not exist in the EPUB container.
    #[error("Resource not found: Unable to find resource from \"{resource}\".")]
    ResourceNotFound { resource: String },

    /// UTF-8 decoding error
    #[error("Decode error: {source}")]
    Utf8DecodeError { source: std::string::FromUtf8Error },

    /// UTF-16 decoding error
    #[error("Decode error: {source}")]
    Utf16DecodeError { source: std::string::FromUtf16Error },

    /// QuickXml error
    ///
    /// This error occurs when parsing XML data using the QuickXml library.
    #[error("QuickXml error: {source}")]
    QuickXmlError { source: quick_xml::Error },
}

impl EpubError {
    /// Returns `true` if the conversion ended because it was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EpubError::Cancelled)
    }

    /// Returns `true` if the error aborts the whole conversion
    ///
    /// Fatal errors concern the package structure itself; every other error
    /// is recoverable at chapter granularity.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EpubError::MissingContainer
                | EpubError::MissingPackage { .. }
                | EpubError::MissingRootfile
                | EpubError::ArchiveError { .. }
        )
    }
}

impl From<zip::result::ZipError> for EpubError {
    fn from(value: zip::result::ZipError) -> Self {
        EpubError::ArchiveError { source: value }
    }
}

impl From<quick_xml::Error> for EpubError {
    fn from(value: quick_xml::Error) -> Self {
        EpubError::QuickXmlError { source: value }
    }
}

impl From<std::io::Error> for EpubError {
    fn from(value: std::io::Error) -> Self {
        EpubError::IOError { source: value }
    }
}

impl From<std::string::FromUtf8Error> for EpubError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        EpubError::Utf8DecodeError { source: value }
    }
}

impl From<std::string::FromUtf16Error> for EpubError {
    fn from(value: std::string::FromUtf16Error) -> Self {
        EpubError::Utf16DecodeError { source: value }
    }
}

#[cfg(test)]
impl PartialEq for EpubError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::MissingRequiredAttribute {
                    tag: l_tag,
                    attribute: l_attribute,
                },
                Self::MissingRequiredAttribute {
                    tag: r_tag,
                    attribute: r_attribute,
                },
            ) => l_tag == r_tag && l_attribute == r_attribute,
            (Self::MissingPackage { path: l_path }, Self::MissingPackage { path: r_path }) => {
                l_path == r_path
            }
            (Self::NonCanonicalFile { tag: l_tag }, Self::NonCanonicalFile { tag: r_tag }) => {
                l_tag == r_tag
            }
            (
                Self::ResourceNotFound {
                    resource: l_resource,
                },
                Self::ResourceNotFound {
                    resource: r_resource,
                },
            ) => l_resource == r_resource,
            (
                Self::Utf8DecodeError { source: l_source },
                Self::Utf8DecodeError { source: r_source },
            ) => l_source == r_source,

            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}
