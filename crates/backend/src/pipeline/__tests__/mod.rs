mod archive;
mod folder;
mod helpers;
mod streaming;
