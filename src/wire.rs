//! Flatbuffer table accessors and builders for the wire protocol
//!
//! Kept in sync with `modelpipe.fbs` by hand. Field slots are wire-stable:
//! a peer implemented in any language against the same schema interoperates
//! bit-exactly. All readers go through [`flatbuffers::root`] so untrusted
//! request bytes are verified before any accessor runs.

use flatbuffers::{FlatBufferBuilder, Follow, ForwardsUOffset, InvalidFlatbuffer, Vector, WIPOffset};

/// Union tags for `Request.req`
pub mod req {
    pub const NONE: u8 = 0;
    pub const METADATA_REQUEST: u8 = 1;
    pub const INFER_REQUEST: u8 = 2;
}

// ---------------------------------------------------------------------------
// Tensor

#[derive(Copy, Clone)]
pub struct Tensor<'a> {
    pub _tab: flatbuffers::Table<'a>,
}

impl<'a> Follow<'a> for Tensor<'a> {
    type Inner = Tensor<'a>;
    #[inline]
    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            _tab: flatbuffers::Table::new(buf, loc),
        }
    }
}

impl<'a> Tensor<'a> {
    pub const VT_TYPE: flatbuffers::VOffsetT = 4;
    pub const VT_SHAPE: flatbuffers::VOffsetT = 6;
    pub const VT_DATA: flatbuffers::VOffsetT = 8;
    pub const VT_STRING_VAL: flatbuffers::VOffsetT = 10;

    #[inline]
    pub fn type_(&self) -> u8 {
        unsafe { self._tab.get::<u8>(Self::VT_TYPE, Some(0)).unwrap() }
    }

    #[inline]
    pub fn shape(&self) -> Option<Vector<'a, i64>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, i64>>>(Self::VT_SHAPE, None)
        }
    }

    #[inline]
    pub fn data(&self) -> Option<Vector<'a, u8>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, u8>>>(Self::VT_DATA, None)
        }
    }

    #[inline]
    pub fn string_val(&self) -> Option<Vector<'a, ForwardsUOffset<&'a str>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<&'a str>>>>(
                    Self::VT_STRING_VAL,
                    None,
                )
        }
    }

    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        args: &TensorArgs<'b>,
    ) -> WIPOffset<Tensor<'b>> {
        let start = fbb.start_table();
        if let Some(x) = args.string_val {
            fbb.push_slot_always(Self::VT_STRING_VAL, x);
        }
        if let Some(x) = args.data {
            fbb.push_slot_always(Self::VT_DATA, x);
        }
        if let Some(x) = args.shape {
            fbb.push_slot_always(Self::VT_SHAPE, x);
        }
        fbb.push_slot::<u8>(Self::VT_TYPE, args.type_, 0);
        let o = fbb.end_table(start);
        WIPOffset::new(o.value())
    }
}

impl flatbuffers::Verifiable for Tensor<'_> {
    fn run_verifier(
        v: &mut flatbuffers::Verifier,
        pos: usize,
    ) -> std::result::Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<u8>("type", Self::VT_TYPE, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, i64>>>("shape", Self::VT_SHAPE, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, u8>>>("data", Self::VT_DATA, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<&str>>>>(
                "string_val",
                Self::VT_STRING_VAL,
                false,
            )?
            .finish();
        Ok(())
    }
}

#[derive(Default)]
pub struct TensorArgs<'a> {
    pub type_: u8,
    pub shape: Option<WIPOffset<Vector<'a, i64>>>,
    pub data: Option<WIPOffset<Vector<'a, u8>>>,
    pub string_val: Option<WIPOffset<Vector<'a, ForwardsUOffset<&'a str>>>>,
}

// ---------------------------------------------------------------------------
// Error

#[derive(Copy, Clone)]
pub struct Error<'a> {
    pub _tab: flatbuffers::Table<'a>,
}

impl<'a> Follow<'a> for Error<'a> {
    type Inner = Error<'a>;
    #[inline]
    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            _tab: flatbuffers::Table::new(buf, loc),
        }
    }
}

impl<'a> Error<'a> {
    pub const VT_CODE: flatbuffers::VOffsetT = 4;
    pub const VT_MESSAGE: flatbuffers::VOffsetT = 6;

    #[inline]
    pub fn code(&self) -> i64 {
        unsafe { self._tab.get::<i64>(Self::VT_CODE, Some(0)).unwrap() }
    }

    #[inline]
    pub fn message(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_MESSAGE, None) }
    }

    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        code: i64,
        message: Option<WIPOffset<&'b str>>,
    ) -> WIPOffset<Error<'b>> {
        let start = fbb.start_table();
        if let Some(x) = message {
            fbb.push_slot_always(Self::VT_MESSAGE, x);
        }
        fbb.push_slot::<i64>(Self::VT_CODE, code, 0);
        let o = fbb.end_table(start);
        WIPOffset::new(o.value())
    }
}

impl flatbuffers::Verifiable for Error<'_> {
    fn run_verifier(
        v: &mut flatbuffers::Verifier,
        pos: usize,
    ) -> std::result::Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i64>("code", Self::VT_CODE, false)?
            .visit_field::<ForwardsUOffset<&str>>("message", Self::VT_MESSAGE, false)?
            .finish();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InferRequest

#[derive(Copy, Clone)]
pub struct InferRequest<'a> {
    pub _tab: flatbuffers::Table<'a>,
}

impl<'a> Follow<'a> for InferRequest<'a> {
    type Inner = InferRequest<'a>;
    #[inline]
    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            _tab: flatbuffers::Table::new(buf, loc),
        }
    }
}

impl<'a> InferRequest<'a> {
    pub const VT_CONFIG: flatbuffers::VOffsetT = 4;
    pub const VT_INPUT_NAMES: flatbuffers::VOffsetT = 6;
    pub const VT_INPUT_TENSORS: flatbuffers::VOffsetT = 8;
    pub const VT_OUTPUT_NAMES: flatbuffers::VOffsetT = 10;

    #[inline]
    pub fn config(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_CONFIG, None) }
    }

    #[inline]
    pub fn input_names(&self) -> Option<Vector<'a, ForwardsUOffset<&'a str>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<&'a str>>>>(
                    Self::VT_INPUT_NAMES,
                    None,
                )
        }
    }

    #[inline]
    pub fn input_tensors(&self) -> Option<Vector<'a, ForwardsUOffset<Tensor<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<Tensor<'a>>>>>(
                    Self::VT_INPUT_TENSORS,
                    None,
                )
        }
    }

    #[inline]
    pub fn output_names(&self) -> Option<Vector<'a, ForwardsUOffset<&'a str>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<&'a str>>>>(
                    Self::VT_OUTPUT_NAMES,
                    None,
                )
        }
    }

    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        args: &InferRequestArgs<'b>,
    ) -> WIPOffset<InferRequest<'b>> {
        let start = fbb.start_table();
        if let Some(x) = args.output_names {
            fbb.push_slot_always(Self::VT_OUTPUT_NAMES, x);
        }
        if let Some(x) = args.input_tensors {
            fbb.push_slot_always(Self::VT_INPUT_TENSORS, x);
        }
        if let Some(x) = args.input_names {
            fbb.push_slot_always(Self::VT_INPUT_NAMES, x);
        }
        if let Some(x) = args.config {
            fbb.push_slot_always(Self::VT_CONFIG, x);
        }
        let o = fbb.end_table(start);
        WIPOffset::new(o.value())
    }
}

impl flatbuffers::Verifiable for InferRequest<'_> {
    fn run_verifier(
        v: &mut flatbuffers::Verifier,
        pos: usize,
    ) -> std::result::Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("config", Self::VT_CONFIG, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<&str>>>>(
                "input_names",
                Self::VT_INPUT_NAMES,
                false,
            )?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<Tensor>>>>(
                "input_tensors",
                Self::VT_INPUT_TENSORS,
                false,
            )?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<&str>>>>(
                "output_names",
                Self::VT_OUTPUT_NAMES,
                false,
            )?
            .finish();
        Ok(())
    }
}

#[derive(Default)]
pub struct InferRequestArgs<'a> {
    pub config: Option<WIPOffset<&'a str>>,
    pub input_names: Option<WIPOffset<Vector<'a, ForwardsUOffset<&'a str>>>>,
    pub input_tensors: Option<WIPOffset<Vector<'a, ForwardsUOffset<Tensor<'a>>>>>,
    pub output_names: Option<WIPOffset<Vector<'a, ForwardsUOffset<&'a str>>>>,
}

// ---------------------------------------------------------------------------
// MetadataRequest

#[derive(Copy, Clone)]
pub struct MetadataRequest<'a> {
    pub _tab: flatbuffers::Table<'a>,
}

impl<'a> Follow<'a> for MetadataRequest<'a> {
    type Inner = MetadataRequest<'a>;
    #[inline]
    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            _tab: flatbuffers::Table::new(buf, loc),
        }
    }
}

impl<'a> MetadataRequest<'a> {
    pub fn create<'b>(fbb: &mut FlatBufferBuilder<'b>) -> WIPOffset<MetadataRequest<'b>> {
        let start = fbb.start_table();
        let o = fbb.end_table(start);
        WIPOffset::new(o.value())
    }
}

impl flatbuffers::Verifiable for MetadataRequest<'_> {
    fn run_verifier(
        v: &mut flatbuffers::Verifier,
        pos: usize,
    ) -> std::result::Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?.finish();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Request (root, carries the Req union)

#[derive(Copy, Clone)]
pub struct Request<'a> {
    pub _tab: flatbuffers::Table<'a>,
}

impl<'a> Follow<'a> for Request<'a> {
    type Inner = Request<'a>;
    #[inline]
    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            _tab: flatbuffers::Table::new(buf, loc),
        }
    }
}

impl<'a> Request<'a> {
    pub const VT_REQ_TYPE: flatbuffers::VOffsetT = 4;
    pub const VT_REQ: flatbuffers::VOffsetT = 6;

    #[inline]
    pub fn req_type(&self) -> u8 {
        unsafe { self._tab.get::<u8>(Self::VT_REQ_TYPE, Some(req::NONE)).unwrap() }
    }

    #[inline]
    fn req(&self) -> Option<flatbuffers::Table<'a>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<flatbuffers::Table<'a>>>(Self::VT_REQ, None)
        }
    }

    #[inline]
    pub fn req_as_infer_request(&self) -> Option<InferRequest<'a>> {
        if self.req_type() == req::INFER_REQUEST {
            self.req().map(|t| InferRequest { _tab: t })
        } else {
            None
        }
    }

    #[inline]
    pub fn req_as_metadata_request(&self) -> Option<MetadataRequest<'a>> {
        if self.req_type() == req::METADATA_REQUEST {
            self.req().map(|t| MetadataRequest { _tab: t })
        } else {
            None
        }
    }

    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        req_type: u8,
        req: WIPOffset<flatbuffers::UnionWIPOffset>,
    ) -> WIPOffset<Request<'b>> {
        let start = fbb.start_table();
        fbb.push_slot_always(Self::VT_REQ, req);
        fbb.push_slot::<u8>(Self::VT_REQ_TYPE, req_type, req::NONE);
        let o = fbb.end_table(start);
        WIPOffset::new(o.value())
    }
}

impl flatbuffers::Verifiable for Request<'_> {
    fn run_verifier(
        v: &mut flatbuffers::Verifier,
        pos: usize,
    ) -> std::result::Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_union::<u8, _>(
                "req_type",
                Self::VT_REQ_TYPE,
                "req",
                Self::VT_REQ,
                false,
                |tag, v, pos| match tag {
                    req::METADATA_REQUEST => v
                        .verify_union_variant::<ForwardsUOffset<MetadataRequest>>(
                            "Req::MetadataRequest",
                            pos,
                        ),
                    req::INFER_REQUEST => v
                        .verify_union_variant::<ForwardsUOffset<InferRequest>>(
                            "Req::InferRequest",
                            pos,
                        ),
                    _ => Ok(()),
                },
            )?
            .finish();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// IOMetadata

#[derive(Copy, Clone)]
pub struct IOMetadata<'a> {
    pub _tab: flatbuffers::Table<'a>,
}

impl<'a> Follow<'a> for IOMetadata<'a> {
    type Inner = IOMetadata<'a>;
    #[inline]
    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            _tab: flatbuffers::Table::new(buf, loc),
        }
    }
}

impl<'a> IOMetadata<'a> {
    pub const VT_NAME: flatbuffers::VOffsetT = 4;
    pub const VT_DESCRIPTION: flatbuffers::VOffsetT = 6;
    pub const VT_SHAPE: flatbuffers::VOffsetT = 8;
    pub const VT_TYPE: flatbuffers::VOffsetT = 10;

    #[inline]
    pub fn name(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_NAME, None) }
    }

    #[inline]
    pub fn description(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_DESCRIPTION, None) }
    }

    #[inline]
    pub fn shape(&self) -> Option<Vector<'a, i64>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, i64>>>(Self::VT_SHAPE, None)
        }
    }

    #[inline]
    pub fn type_(&self) -> u8 {
        unsafe { self._tab.get::<u8>(Self::VT_TYPE, Some(0)).unwrap() }
    }

    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        args: &IOMetadataArgs<'b>,
    ) -> WIPOffset<IOMetadata<'b>> {
        let start = fbb.start_table();
        if let Some(x) = args.shape {
            fbb.push_slot_always(Self::VT_SHAPE, x);
        }
        if let Some(x) = args.description {
            fbb.push_slot_always(Self::VT_DESCRIPTION, x);
        }
        if let Some(x) = args.name {
            fbb.push_slot_always(Self::VT_NAME, x);
        }
        fbb.push_slot::<u8>(Self::VT_TYPE, args.type_, 0);
        let o = fbb.end_table(start);
        WIPOffset::new(o.value())
    }
}

impl flatbuffers::Verifiable for IOMetadata<'_> {
    fn run_verifier(
        v: &mut flatbuffers::Verifier,
        pos: usize,
    ) -> std::result::Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("name", Self::VT_NAME, false)?
            .visit_field::<ForwardsUOffset<&str>>("description", Self::VT_DESCRIPTION, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, i64>>>("shape", Self::VT_SHAPE, false)?
            .visit_field::<u8>("type", Self::VT_TYPE, false)?
            .finish();
        Ok(())
    }
}

#[derive(Default)]
pub struct IOMetadataArgs<'a> {
    pub name: Option<WIPOffset<&'a str>>,
    pub description: Option<WIPOffset<&'a str>>,
    pub shape: Option<WIPOffset<Vector<'a, i64>>>,
    pub type_: u8,
}

// ---------------------------------------------------------------------------
// MetadataResponse

#[derive(Copy, Clone)]
pub struct MetadataResponse<'a> {
    pub _tab: flatbuffers::Table<'a>,
}

impl<'a> Follow<'a> for MetadataResponse<'a> {
    type Inner = MetadataResponse<'a>;
    #[inline]
    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            _tab: flatbuffers::Table::new(buf, loc),
        }
    }
}

impl<'a> MetadataResponse<'a> {
    pub const VT_NAME: flatbuffers::VOffsetT = 4;
    pub const VT_VERSION: flatbuffers::VOffsetT = 6;
    pub const VT_SERVER: flatbuffers::VOffsetT = 8;
    pub const VT_DESCRIPTION: flatbuffers::VOffsetT = 10;
    pub const VT_INPUTS: flatbuffers::VOffsetT = 12;
    pub const VT_OUTPUTS: flatbuffers::VOffsetT = 14;

    #[inline]
    pub fn name(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_NAME, None) }
    }

    #[inline]
    pub fn version(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_VERSION, None) }
    }

    #[inline]
    pub fn server(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_SERVER, None) }
    }

    #[inline]
    pub fn description(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_DESCRIPTION, None) }
    }

    #[inline]
    pub fn inputs(&self) -> Option<Vector<'a, ForwardsUOffset<IOMetadata<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<IOMetadata<'a>>>>>(
                    Self::VT_INPUTS,
                    None,
                )
        }
    }

    #[inline]
    pub fn outputs(&self) -> Option<Vector<'a, ForwardsUOffset<IOMetadata<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<IOMetadata<'a>>>>>(
                    Self::VT_OUTPUTS,
                    None,
                )
        }
    }

    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        args: &MetadataResponseArgs<'b>,
    ) -> WIPOffset<MetadataResponse<'b>> {
        let start = fbb.start_table();
        if let Some(x) = args.outputs {
            fbb.push_slot_always(Self::VT_OUTPUTS, x);
        }
        if let Some(x) = args.inputs {
            fbb.push_slot_always(Self::VT_INPUTS, x);
        }
        if let Some(x) = args.description {
            fbb.push_slot_always(Self::VT_DESCRIPTION, x);
        }
        if let Some(x) = args.server {
            fbb.push_slot_always(Self::VT_SERVER, x);
        }
        if let Some(x) = args.version {
            fbb.push_slot_always(Self::VT_VERSION, x);
        }
        if let Some(x) = args.name {
            fbb.push_slot_always(Self::VT_NAME, x);
        }
        let o = fbb.end_table(start);
        WIPOffset::new(o.value())
    }
}

impl flatbuffers::Verifiable for MetadataResponse<'_> {
    fn run_verifier(
        v: &mut flatbuffers::Verifier,
        pos: usize,
    ) -> std::result::Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("name", Self::VT_NAME, false)?
            .visit_field::<ForwardsUOffset<&str>>("version", Self::VT_VERSION, false)?
            .visit_field::<ForwardsUOffset<&str>>("server", Self::VT_SERVER, false)?
            .visit_field::<ForwardsUOffset<&str>>("description", Self::VT_DESCRIPTION, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<IOMetadata>>>>(
                "inputs",
                Self::VT_INPUTS,
                false,
            )?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<IOMetadata>>>>(
                "outputs",
                Self::VT_OUTPUTS,
                false,
            )?
            .finish();
        Ok(())
    }
}

#[derive(Default)]
pub struct MetadataResponseArgs<'a> {
    pub name: Option<WIPOffset<&'a str>>,
    pub version: Option<WIPOffset<&'a str>>,
    pub server: Option<WIPOffset<&'a str>>,
    pub description: Option<WIPOffset<&'a str>>,
    pub inputs: Option<WIPOffset<Vector<'a, ForwardsUOffset<IOMetadata<'a>>>>>,
    pub outputs: Option<WIPOffset<Vector<'a, ForwardsUOffset<IOMetadata<'a>>>>>,
}

// ---------------------------------------------------------------------------
// InferResponse

#[derive(Copy, Clone)]
pub struct InferResponse<'a> {
    pub _tab: flatbuffers::Table<'a>,
}

impl<'a> Follow<'a> for InferResponse<'a> {
    type Inner = InferResponse<'a>;
    #[inline]
    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            _tab: flatbuffers::Table::new(buf, loc),
        }
    }
}

impl<'a> InferResponse<'a> {
    pub const VT_OUTPUT_TENSORS: flatbuffers::VOffsetT = 4;
    pub const VT_ERRORS: flatbuffers::VOffsetT = 6;

    #[inline]
    pub fn output_tensors(&self) -> Option<Vector<'a, ForwardsUOffset<Tensor<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<Tensor<'a>>>>>(
                    Self::VT_OUTPUT_TENSORS,
                    None,
                )
        }
    }

    #[inline]
    pub fn errors(&self) -> Option<Vector<'a, ForwardsUOffset<Error<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<Error<'a>>>>>(
                    Self::VT_ERRORS,
                    None,
                )
        }
    }

    pub fn create<'b>(
        fbb: &mut FlatBufferBuilder<'b>,
        args: &InferResponseArgs<'b>,
    ) -> WIPOffset<InferResponse<'b>> {
        let start = fbb.start_table();
        if let Some(x) = args.errors {
            fbb.push_slot_always(Self::VT_ERRORS, x);
        }
        if let Some(x) = args.output_tensors {
            fbb.push_slot_always(Self::VT_OUTPUT_TENSORS, x);
        }
        let o = fbb.end_table(start);
        WIPOffset::new(o.value())
    }
}

impl flatbuffers::Verifiable for InferResponse<'_> {
    fn run_verifier(
        v: &mut flatbuffers::Verifier,
        pos: usize,
    ) -> std::result::Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<Tensor>>>>(
                "output_tensors",
                Self::VT_OUTPUT_TENSORS,
                false,
            )?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<Error>>>>(
                "errors",
                Self::VT_ERRORS,
                false,
            )?
            .finish();
        Ok(())
    }
}

#[derive(Default)]
pub struct InferResponseArgs<'a> {
    pub output_tensors: Option<WIPOffset<Vector<'a, ForwardsUOffset<Tensor<'a>>>>>,
    pub errors: Option<WIPOffset<Vector<'a, ForwardsUOffset<Error<'a>>>>>,
}

// ---------------------------------------------------------------------------
// Verified root readers

pub fn root_as_request(buf: &[u8]) -> std::result::Result<Request<'_>, InvalidFlatbuffer> {
    flatbuffers::root::<Request>(buf)
}

pub fn root_as_infer_response(
    buf: &[u8],
) -> std::result::Result<InferResponse<'_>, InvalidFlatbuffer> {
    flatbuffers::root::<InferResponse>(buf)
}

pub fn root_as_metadata_response(
    buf: &[u8],
) -> std::result::Result<MetadataResponse<'_>, InvalidFlatbuffer> {
    flatbuffers::root::<MetadataResponse>(buf)
}

pub fn root_as_tensor(buf: &[u8]) -> std::result::Result<Tensor<'_>, InvalidFlatbuffer> {
    flatbuffers::root::<Tensor>(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_table_round_trip() {
        let mut fbb = FlatBufferBuilder::new();
        let shape = fbb.create_vector(&[2i64, 3]);
        let data = fbb.create_vector(&[0u8; 48]);
        let t = Tensor::create(
            &mut fbb,
            &TensorArgs {
                type_: 8,
                shape: Some(shape),
                data: Some(data),
                string_val: None,
            },
        );
        fbb.finish(t, None);

        let back = root_as_tensor(fbb.finished_data()).unwrap();
        assert_eq!(back.type_(), 8);
        let shape: Vec<i64> = back.shape().unwrap().iter().collect();
        assert_eq!(shape, vec![2, 3]);
        assert_eq!(back.data().unwrap().len(), 48);
        assert!(back.string_val().is_none());
    }

    #[test]
    fn test_request_union_round_trip() {
        let mut fbb = FlatBufferBuilder::new();
        let config = fbb.create_string("opts");
        let infer = InferRequest::create(
            &mut fbb,
            &InferRequestArgs {
                config: Some(config),
                ..Default::default()
            },
        );
        let request = Request::create(&mut fbb, req::INFER_REQUEST, infer.as_union_value());
        fbb.finish(request, None);

        let back = root_as_request(fbb.finished_data()).unwrap();
        assert_eq!(back.req_type(), req::INFER_REQUEST);
        assert!(back.req_as_metadata_request().is_none());
        let infer = back.req_as_infer_request().unwrap();
        assert_eq!(infer.config(), Some("opts"));
        assert!(infer.input_tensors().is_none());
    }

    #[test]
    fn test_metadata_request_round_trip() {
        let mut fbb = FlatBufferBuilder::new();
        let md = MetadataRequest::create(&mut fbb);
        let request = Request::create(&mut fbb, req::METADATA_REQUEST, md.as_union_value());
        fbb.finish(request, None);

        let back = root_as_request(fbb.finished_data()).unwrap();
        assert_eq!(back.req_type(), req::METADATA_REQUEST);
        assert!(back.req_as_metadata_request().is_some());
        assert!(back.req_as_infer_request().is_none());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(root_as_request(&[1, 2, 3]).is_err());
        assert!(root_as_infer_response(b"not a flatbuffer at all").is_err());
    }

    #[test]
    fn test_string_tensor_table() {
        let mut fbb = FlatBufferBuilder::new();
        let str_offsets = ["foo", "bar", "baz"].map(|s| fbb.create_string(s));
        let strs = fbb.create_vector(&str_offsets);
        let shape = fbb.create_vector(&[3i64]);
        let t = Tensor::create(
            &mut fbb,
            &TensorArgs {
                type_: 12,
                shape: Some(shape),
                data: None,
                string_val: Some(strs),
            },
        );
        fbb.finish(t, None);

        let back = root_as_tensor(fbb.finished_data()).unwrap();
        let vals: Vec<&str> = back.string_val().unwrap().iter().collect();
        assert_eq!(vals, vec!["foo", "bar", "baz"]);
    }
}
