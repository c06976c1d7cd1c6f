use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use crate::metadata::{
    flags::{ClassFlags, ClassStatus, MemberFlags},
    model::{
        ClassDef, ClassInfo, ClassLoaderContext, ClassVerification, CodeBody, ImagePointers,
        MethodDef, MethodVerification, ResolvedField, ResolvedMethod, VerifiedMethod,
    },
    reference::{
        ClassReference, FieldIndex, InvokeKind, MethodReference, ModuleId, StringIndex, TypeIndex,
    },
    typesystem::TypeSystem,
};

struct MockClass {
    info: ClassInfo,
    def: ClassDef,
    verification: ClassVerification,
    can_initialize: bool,
    vtable: Vec<MethodReference>,
    image_dependencies: Vec<String>,
}

/// In-memory [`TypeSystem`] assembled by hand for tests.
#[derive(Default)]
pub struct MockTypeSystem {
    classes: BTreeMap<ClassReference, MockClass>,
    methods: HashMap<MethodReference, ResolvedMethod>,
    types: HashMap<(ModuleId, TypeIndex), ClassReference>,
    fields: HashMap<(ModuleId, FieldIndex), ResolvedField>,
    method_refs: HashMap<(ModuleId, u32), MethodReference>,
    strings: HashSet<(ModuleId, StringIndex)>,
    initialized: Mutex<HashSet<ClassReference>>,
    pub resolve_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub initialize_calls: AtomicUsize,
}

impl MockTypeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    // Helper function to add a class to the model
    pub fn add_class(
        &mut self,
        class: ClassReference,
        descriptor: &str,
        flags: ClassFlags,
        superclass: Option<ClassReference>,
    ) -> ClassReference {
        let mock = MockClass {
            info: ClassInfo {
                reference: class,
                descriptor: descriptor.to_string(),
                flags,
                superclass,
                in_boot_image: false,
                image_address: None,
            },
            def: ClassDef {
                reference: class,
                descriptor: descriptor.to_string(),
                has_final_instance_fields: false,
                methods: Vec::new(),
            },
            verification: ClassVerification {
                status: ClassStatus::Verified,
                methods: BTreeMap::new(),
            },
            can_initialize: true,
            vtable: Vec::new(),
            image_dependencies: Vec::new(),
        };
        self.classes.insert(class, mock);
        class
    }

    // Helper function to add a method with an optional body to a class
    pub fn add_method(
        &mut self,
        class: ClassReference,
        method_index: u32,
        name: &str,
        flags: MemberFlags,
        kind: InvokeKind,
        code: Option<CodeBody>,
    ) -> MethodReference {
        let reference = MethodReference::new(class.module, method_index);
        self.methods.insert(
            reference,
            ResolvedMethod {
                reference,
                declaring_class: class,
                flags,
                vtable_index: 0,
                image_pointers: None,
            },
        );
        self.method_refs
            .insert((class.module, method_index), reference);
        self.mock(class).def.methods.push(MethodDef {
            reference,
            name: name.to_string(),
            flags,
            kind,
            code,
        });
        reference
    }

    pub fn set_boot(&mut self, class: ClassReference, image_address: Option<u64>) {
        let info = &mut self.mock(class).info;
        info.in_boot_image = true;
        info.image_address = image_address;
    }

    pub fn set_final_instance_fields(&mut self, class: ClassReference) {
        self.mock(class).def.has_final_instance_fields = true;
    }

    pub fn set_vtable_index(&mut self, method: MethodReference, index: u16) {
        if let Some(resolved) = self.methods.get_mut(&method) {
            resolved.vtable_index = index;
        }
    }

    pub fn set_image_pointers(&mut self, method: MethodReference, pointers: ImagePointers) {
        if let Some(resolved) = self.methods.get_mut(&method) {
            resolved.image_pointers = Some(pointers);
        }
    }

    pub fn set_vtable(&mut self, class: ClassReference, vtable: Vec<MethodReference>) {
        self.mock(class).vtable = vtable;
    }

    pub fn map_type(&mut self, module: ModuleId, index: TypeIndex, class: ClassReference) {
        self.types.insert((module, index), class);
    }

    pub fn map_method(&mut self, module: ModuleId, method_index: u32, target: MethodReference) {
        self.method_refs.insert((module, method_index), target);
    }

    pub fn add_field(
        &mut self,
        module: ModuleId,
        index: FieldIndex,
        declaring_class: ClassReference,
        flags: MemberFlags,
        offset: u32,
    ) {
        self.fields.insert(
            (module, index),
            ResolvedField {
                declaring_class,
                flags,
                offset,
            },
        );
    }

    pub fn add_string(&mut self, module: ModuleId, index: StringIndex) {
        self.strings.insert((module, index));
    }

    pub fn set_class_status(&mut self, class: ClassReference, status: ClassStatus) {
        self.mock(class).verification.status = status;
    }

    pub fn verify_method(&mut self, method: MethodReference, verified: VerifiedMethod) {
        let class = self.methods[&method].declaring_class;
        self.mock(class)
            .verification
            .methods
            .insert(method, MethodVerification::Verified(verified));
    }

    pub fn reject_method(&mut self, method: MethodReference, reason: &str) {
        let class = self.methods[&method].declaring_class;
        self.mock(class).verification.methods.insert(
            method,
            MethodVerification::Rejected {
                reason: reason.to_string(),
            },
        );
    }

    pub fn set_initialized(&self, class: ClassReference) {
        self.initialized.lock().unwrap().insert(class);
    }

    pub fn set_can_initialize(&mut self, class: ClassReference, can_initialize: bool) {
        self.mock(class).can_initialize = can_initialize;
    }

    pub fn set_image_dependencies(&mut self, class: ClassReference, descriptors: &[&str]) {
        self.mock(class).image_dependencies =
            descriptors.iter().map(|d| (*d).to_string()).collect();
    }

    pub fn resolve_count(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    fn mock(&mut self, class: ClassReference) -> &mut MockClass {
        self.classes
            .get_mut(&class)
            .unwrap_or_else(|| panic!("class {class} was not added"))
    }
}

impl TypeSystem for MockTypeSystem {
    fn classes(&self, module: ModuleId) -> Vec<ClassReference> {
        self.classes
            .keys()
            .filter(|class| class.module == module)
            .copied()
            .collect()
    }

    fn class_def(&self, class: ClassReference) -> Option<ClassDef> {
        self.classes.get(&class).map(|mock| mock.def.clone())
    }

    fn declaring_class(&self, method: MethodReference) -> Option<ClassReference> {
        self.methods.get(&method).map(|m| m.declaring_class)
    }

    fn class_info(&self, class: ClassReference) -> Option<ClassInfo> {
        self.classes.get(&class).map(|mock| mock.info.clone())
    }

    fn resolve_type(
        &self,
        _loader: &ClassLoaderContext,
        module: ModuleId,
        index: TypeIndex,
    ) -> Option<ClassReference> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.types.get(&(module, index)).copied()
    }

    fn resolve_field(
        &self,
        _loader: &ClassLoaderContext,
        module: ModuleId,
        index: FieldIndex,
        is_static: bool,
    ) -> Option<ResolvedField> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.fields
            .get(&(module, index))
            .copied()
            .filter(|field| field.is_static() == is_static)
    }

    fn resolve_method(
        &self,
        _loader: &ClassLoaderContext,
        module: ModuleId,
        method_index: u32,
        kind: InvokeKind,
    ) -> Option<ResolvedMethod> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let target = self.method_refs.get(&(module, method_index))?;
        self.methods
            .get(target)
            .copied()
            .filter(|method| method.is_static() == (kind == InvokeKind::Static))
    }

    fn method(&self, method: MethodReference) -> Option<ResolvedMethod> {
        self.methods.get(&method).copied()
    }

    fn resolve_string(
        &self,
        _loader: &ClassLoaderContext,
        module: ModuleId,
        index: StringIndex,
    ) -> bool {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.strings.contains(&(module, index))
    }

    fn find_type_index(&self, module: ModuleId, descriptor: &str) -> Option<TypeIndex> {
        self.types
            .iter()
            .filter(|((m, _), class)| {
                *m == module
                    && self
                        .classes
                        .get(class)
                        .is_some_and(|mock| mock.info.descriptor == descriptor)
            })
            .map(|((_, index), _)| *index)
            .min()
    }

    fn vtable_entry(&self, class: ClassReference, index: u16) -> Option<MethodReference> {
        self.classes
            .get(&class)
            .and_then(|mock| mock.vtable.get(usize::from(index)).copied())
    }

    fn verify_class(&self, class: ClassReference) -> ClassVerification {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.classes
            .get(&class)
            .map(|mock| mock.verification.clone())
            .unwrap_or_default()
    }

    fn is_initialized(&self, class: ClassReference) -> bool {
        self.initialized.lock().unwrap().contains(&class)
    }

    fn can_initialize(&self, class: ClassReference) -> bool {
        self.classes
            .get(&class)
            .is_some_and(|mock| mock.can_initialize)
    }

    fn initialize_class(&self, class: ClassReference) -> bool {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if !self.can_initialize(class) {
            return false;
        }
        self.initialized.lock().unwrap().insert(class);
        true
    }

    fn image_dependencies(&self, class: ClassReference) -> Vec<String> {
        self.classes
            .get(&class)
            .map(|mock| mock.image_dependencies.clone())
            .unwrap_or_default()
    }
}
